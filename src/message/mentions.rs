use crate::lid_mapping::LidMappingStore;
use std::collections::HashMap;
use wacore::proto::whatsapp as wa;
use wacore::store::KeyStore;
use wacore_binary::jid::Jid;

/// Rewrites LID mentions of `message` to phone numbers, in the mention
/// list and as `@user` markers in the text or caption. Mentions that
/// cannot be resolved stay as they are. Returns how many were rewritten.
pub async fn rewrite_lid_mentions(
    mappings: &LidMappingStore,
    keys: &dyn KeyStore,
    message: &mut wa::Message,
) -> usize {
    let (text, context) = if let Some(ext) = message.extended_text_message.as_mut() {
        (ext.text.as_mut(), ext.context_info.as_mut())
    } else if let Some(image) = message.image_message.as_mut() {
        (image.caption.as_mut(), image.context_info.as_mut())
    } else if let Some(video) = message.video_message.as_mut() {
        (video.caption.as_mut(), video.context_info.as_mut())
    } else {
        return 0;
    };
    let Some(context) = context else {
        return 0;
    };

    let mut replacements = HashMap::new();
    for mentioned in context.mentioned_jid.iter_mut() {
        let Ok(lid) = mentioned.parse::<Jid>() else {
            continue;
        };
        if !lid.is_lid() {
            continue;
        }
        match mappings.pn_for_lid(keys, &lid).await {
            Ok(Some(pn)) => {
                replacements.insert(lid.user.clone(), pn.user.clone());
                *mentioned = pn.to_non_ad().to_string();
            }
            Ok(None) => log::debug!(target: "Relay/Mentions", "no phone number known for {lid}"),
            Err(e) => log::warn!(target: "Relay/Mentions", "resolving mention {lid}: {e}"),
        }
    }

    if let Some(text) = text
        && !replacements.is_empty()
    {
        *text = replace_mention_tokens(text, &replacements);
    }
    replacements.len()
}

/// Replaces whole `@<digits>` tokens whose digits are a key of `users`.
fn replace_mention_tokens(text: &str, users: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let len = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
        let digits = &after[..len];
        out.push('@');
        out.push_str(users.get(digits).map_or(digits, String::as_str));
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}
