//! Decoded annotated tag objects.

use crate::{GitObject, ObjectId, ObjectType, Result, Signature, StorageError};

/// An annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Object the tag points at.
    pub target: ObjectId,
    /// Type of the target object.
    pub target_type: ObjectType,
    /// Tag name, without the `refs/tags/` prefix.
    pub name: String,
    /// Who created the tag. Very old tags have none.
    pub tagger: Option<Signature>,
    /// Tag message, including any trailing signature block.
    pub message: String,
}

impl Tag {
    /// Decodes a tag from its encoded object.
    pub fn decode(object: &GitObject) -> Result<Self> {
        if object.object_type != ObjectType::Tag {
            return Err(StorageError::InvalidObject(format!(
                "expected tag, got {}",
                object.object_type
            )));
        }
        let text = std::str::from_utf8(&object.data)
            .map_err(|_| StorageError::InvalidObject(format!("tag {} is not UTF-8", object.id)))?;

        let (headers, message) = match text.find("\n\n") {
            Some(i) => (&text[..i], &text[i + 2..]),
            None => (text.trim_end_matches('\n'), ""),
        };

        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;
        for line in headers.split('\n') {
            match line.split_once(' ') {
                Some(("object", value)) => target = Some(ObjectId::from_hex(value)?),
                Some(("type", value)) => target_type = Some(ObjectType::parse(value)?),
                Some(("tag", value)) => name = Some(value.to_string()),
                Some(("tagger", value)) => tagger = Some(Signature::decode(value)?),
                _ => {}
            }
        }

        let missing = |field: &str| {
            StorageError::InvalidObject(format!("tag {} has no {} header", object.id, field))
        };

        Ok(Self {
            target: target.ok_or_else(|| missing("object"))?,
            target_type: target_type.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger,
            message: message.to_string(),
        })
    }

    /// Encodes the tag into a git object.
    pub fn encode(&self) -> GitObject {
        let mut content = format!(
            "object {}\ntype {}\ntag {}\n",
            self.target, self.target_type, self.name
        );
        if let Some(tagger) = &self.tagger {
            content.push_str(&format!("tagger {}\n", tagger));
        }
        content.push('\n');
        content.push_str(&self.message);
        GitObject::new(ObjectType::Tag, content.into_bytes())
    }
}
