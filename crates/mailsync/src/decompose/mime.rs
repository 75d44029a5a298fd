//! MIME decomposer built on mail-parser

use mail_parser::{Address, MessageParser, MimeHeaders};

use super::{DecomposeError, DecomposedAttachment, DecomposedMessage, MessageDecomposer};
use crate::models::EmailAddress;

/// Decomposer backed by the mail-parser crate
///
/// Handles transfer decoding, charset conversion and multipart traversal;
/// this type only maps the parsed message onto the crate's domain model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeDecomposer;

impl MimeDecomposer {
    pub fn new() -> Self {
        Self
    }
}

/// Convert a parsed address header into domain addresses
fn convert_addresses(address: Option<&Address<'_>>) -> Vec<EmailAddress> {
    address
        .map(|list| {
            list.iter()
                .filter_map(|addr| {
                    addr.address().map(|email| EmailAddress {
                        name: addr.name().map(str::to_string),
                        email: email.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Full content type of a part, defaulting to octet-stream
fn part_content_type(part: &mail_parser::MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        },
        None => "application/octet-stream".to_string(),
    }
}

impl MessageDecomposer for MimeDecomposer {
    fn decompose(&self, raw: &[u8]) -> Result<DecomposedMessage, DecomposeError> {
        let parsed = MessageParser::new()
            .parse(raw)
            .ok_or(DecomposeError::Malformed)?;

        // Prefer the structured From; fall back to parsing the raw header
        let from = convert_addresses(parsed.from()).into_iter().next().or_else(|| {
            parsed
                .header("From")
                .and_then(|value| value.as_text())
                .map(EmailAddress::parse)
        });

        let attachments = parsed
            .attachments()
            .map(|part| DecomposedAttachment {
                filename: part.attachment_name().map(str::to_string),
                content_type: part_content_type(part),
                content_id: part.content_id().map(str::to_string),
                data: part.contents().to_vec(),
            })
            .collect();

        Ok(DecomposedMessage {
            subject: parsed.subject().unwrap_or_default().to_string(),
            from,
            to: convert_addresses(parsed.to()),
            cc: convert_addresses(parsed.cc()),
            bcc: convert_addresses(parsed.bcc()),
            reply_to: convert_addresses(parsed.reply_to()),
            message_id: parsed.message_id().map(str::to_string),
            in_reply_to: parsed.in_reply_to().as_text().map(str::to_string),
            date: parsed
                .date()
                .and_then(|date| chrono::DateTime::from_timestamp(date.to_timestamp(), 0)),
            text: parsed.body_text(0).map(|text| text.to_string()),
            html: parsed.body_html(0).map(|html| html.to_string()),
            attachments,
        })
    }
}
