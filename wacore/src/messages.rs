use crate::proto::whatsapp as wa;
use prost::Message as _;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use wacore_binary::jid::{Jid, MessageId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaddingError {
    #[error("plaintext is empty, cannot unpad")]
    Empty,
    #[error("invalid padding length: {0}")]
    InvalidLength(usize),
    #[error("invalid padding bytes")]
    InvalidBytes,
}

pub struct MessageUtils;

impl MessageUtils {
    /// Appends 1..=15 bytes, each equal to the padding length.
    pub fn pad_message_v2(mut plaintext: Vec<u8>) -> Vec<u8> {
        let mut rng = rand::rng();

        let mut pad_val = rng.random::<u8>() & 0x0F;
        if pad_val == 0 {
            pad_val = 0x0F;
        }

        plaintext.extend(std::iter::repeat_n(pad_val, pad_val as usize));
        plaintext
    }

    pub fn unpad_message_ref(plaintext: &[u8]) -> Result<&[u8], PaddingError> {
        let Some(&last) = plaintext.last() else {
            return Err(PaddingError::Empty);
        };
        let pad_len = last as usize;
        if pad_len == 0 || pad_len > plaintext.len() {
            return Err(PaddingError::InvalidLength(pad_len));
        }
        let (data, padding) = plaintext.split_at(plaintext.len() - pad_len);
        if padding.iter().any(|&b| b != last) {
            return Err(PaddingError::InvalidBytes);
        }
        Ok(data)
    }

    pub fn encode_padded(message: &wa::Message) -> Vec<u8> {
        Self::pad_message_v2(message.encode_to_vec())
    }

    /// Generates an id of the form `3EB0` + 18 upper-case hex characters.
    pub fn generate_message_id(me: Option<&Jid>) -> MessageId {
        let mut data = Vec::with_capacity(8 + 32 + 16);
        data.extend_from_slice(&chrono::Utc::now().timestamp().to_be_bytes());
        if let Some(me) = me {
            data.extend_from_slice(me.user.as_bytes());
            data.extend_from_slice(b"@c.us");
        }
        let random: [u8; 16] = rand::rng().random();
        data.extend_from_slice(&random);

        let hash = Sha256::digest(&data);
        format!("3EB0{}", hex::encode_upper(&hash[..9]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_removed_exactly() {
        let data = b"hello".to_vec();
        for _ in 0..32 {
            let padded = MessageUtils::pad_message_v2(data.clone());
            let pad = padded.len() - data.len();
            assert!((1..=15).contains(&pad));
            assert_eq!(MessageUtils::unpad_message_ref(&padded).unwrap(), b"hello");
        }
    }

    #[test]
    fn malformed_padding_is_rejected() {
        assert_eq!(MessageUtils::unpad_message_ref(&[]), Err(PaddingError::Empty));
        assert_eq!(
            MessageUtils::unpad_message_ref(&[1, 2, 0]),
            Err(PaddingError::InvalidLength(0))
        );
        assert_eq!(
            MessageUtils::unpad_message_ref(&[9]),
            Err(PaddingError::InvalidLength(9))
        );
        assert_eq!(
            MessageUtils::unpad_message_ref(&[1, 3, 2, 3]),
            Err(PaddingError::InvalidBytes)
        );
    }

    #[test]
    fn message_id_shape() {
        let me = Jid::pn("111");
        let id = MessageUtils::generate_message_id(Some(&me));
        assert!(id.starts_with("3EB0"));
        assert_eq!(id.len(), 22);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(id, MessageUtils::generate_message_id(Some(&me)));
    }
}
