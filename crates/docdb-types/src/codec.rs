//! Byte layout of every key DocDB writes.
//!
//! All keys start with a one-byte marker followed by a 0x00 separator, so the
//! key families never interleave in the store's lexicographic order:
//!
//! | family    | layout                                                        |
//! |-----------|---------------------------------------------------------------|
//! | object    | `'o' 0 tag(4, BE) field 0 field 0 ...`                        |
//! | index     | `'i' 0 tag(4, BE) name 0 value-field 0 ... id-field 0 ...`    |
//! | reference | `'r' 0 tag(4, BE) id-field 0 ...`                             |
//! | type      | `'t' 0 type-name`                                             |
//!
//! Fields are terminated by 0x00 and may not contain it. 0x00 sorts below
//! every content byte, so a value that is a field-wise prefix of another
//! sorts first.

use crate::error::KeyError;
use crate::tag::TypeTag;
use crate::value::Value;

pub const OBJECT_MARKER: u8 = b'o';
pub const INDEX_MARKER: u8 = b'i';
pub const REFERENCE_MARKER: u8 = b'r';
pub const TYPE_MARKER: u8 = b't';

/// Field terminator and marker separator.
pub const TERMINATOR: u8 = 0x00;

/// Length of `marker 0 tag` at the start of object, index and reference keys.
pub const HEADER_LEN: usize = 2 + TypeTag::ENCODED_LEN;

/// Components of a decoded index key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexKeyParts {
    pub type_tag: TypeTag,
    pub name: String,
    pub value: Value,
    pub id: Value,
}

/// Two-byte prefix shared by every key of one family.
pub fn family_prefix(marker: u8) -> Vec<u8> {
    vec![marker, TERMINATOR]
}

fn header(marker: u8, tag: TypeTag, extra: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + extra);
    buf.push(marker);
    buf.push(TERMINATOR);
    buf.extend_from_slice(&tag.to_be_bytes());
    buf
}

fn encoded_len(value: &Value) -> usize {
    value.fields().iter().map(|f| f.len() + 1).sum()
}

fn push_fields(buf: &mut Vec<u8>, value: &Value) -> Result<(), KeyError> {
    value.validate()?;
    for field in value.fields() {
        buf.extend_from_slice(field);
        buf.push(TERMINATOR);
    }
    Ok(())
}

fn push_name(buf: &mut Vec<u8>, name: &str) -> Result<(), KeyError> {
    if name.as_bytes().contains(&TERMINATOR) {
        return Err(KeyError::InvalidName(name.to_string()));
    }
    buf.extend_from_slice(name.as_bytes());
    buf.push(TERMINATOR);
    Ok(())
}

/// Split a run of terminated fields back into a value.
fn split_fields(bytes: &[u8]) -> Result<Value, KeyError> {
    let Some((&last, body)) = bytes.split_last() else {
        return Ok(Value::empty());
    };
    if last != TERMINATOR {
        return Err(KeyError::Malformed("unterminated trailing field".into()));
    }
    Ok(Value::from_fields(
        body.split(|b| *b == TERMINATOR).map(<[u8]>::to_vec).collect(),
    ))
}

fn read_header(bytes: &[u8], marker: u8) -> Result<TypeTag, KeyError> {
    if bytes.len() < HEADER_LEN || bytes[0] != marker || bytes[1] != TERMINATOR {
        return Err(KeyError::Malformed(format!(
            "expected '{}' key header",
            marker.escape_ascii()
        )));
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[2..HEADER_LEN]);
    Ok(TypeTag::from_be_bytes(raw))
}

/// Encode the storage key of the document `id` of type `tag`.
pub fn encode_object_key(tag: TypeTag, id: &Value) -> Result<Vec<u8>, KeyError> {
    let mut buf = header(OBJECT_MARKER, tag, encoded_len(id));
    push_fields(&mut buf, id)?;
    Ok(buf)
}

/// Decode an object key into its type tag and primary key.
pub fn decode_object_key(bytes: &[u8]) -> Result<(TypeTag, Value), KeyError> {
    let tag = read_header(bytes, OBJECT_MARKER)?;
    let id = split_fields(&bytes[HEADER_LEN..])?;
    Ok((tag, id))
}

/// Encode one index entry key.
///
/// `id_fields` is the already-encoded primary key portion of the owning
/// object key, i.e. everything after its header.
pub fn encode_index_key(
    tag: TypeTag,
    name: &str,
    value: &Value,
    id_fields: &[u8],
) -> Result<Vec<u8>, KeyError> {
    let mut buf = header(
        INDEX_MARKER,
        tag,
        name.len() + 1 + encoded_len(value) + id_fields.len(),
    );
    push_name(&mut buf, name)?;
    push_fields(&mut buf, value)?;
    buf.extend_from_slice(id_fields);
    Ok(buf)
}

/// Name of the index an index key belongs to.
pub fn index_name_of(index_key: &[u8]) -> Result<String, KeyError> {
    read_header(index_key, INDEX_MARKER)?;
    let rest = &index_key[HEADER_LEN..];
    let end = rest
        .iter()
        .position(|b| *b == TERMINATOR)
        .ok_or_else(|| KeyError::Malformed("unterminated index name".into()))?;
    String::from_utf8(rest[..end].to_vec())
        .map_err(|e| KeyError::Malformed(format!("index name is not UTF-8: {e}")))
}

/// Decode an index key, using the object key it points to to tell the
/// indexed value apart from the primary key.
pub fn decode_index_key(index_key: &[u8], object_key: &[u8]) -> Result<IndexKeyParts, KeyError> {
    let type_tag = read_header(index_key, INDEX_MARKER)?;
    let (object_tag, id) = decode_object_key(object_key)?;
    if object_tag != type_tag {
        return Err(KeyError::Malformed(format!(
            "index tag {type_tag} does not match object tag {object_tag}"
        )));
    }
    let name = index_name_of(index_key)?;
    let body = &index_key[HEADER_LEN + name.len() + 1..];
    let id_fields = &object_key[HEADER_LEN..];
    let value_len = body
        .len()
        .checked_sub(id_fields.len())
        .filter(|_| body.ends_with(id_fields))
        .ok_or_else(|| KeyError::Malformed("index key does not end with the object id".into()))?;
    let value = split_fields(&body[..value_len])?;
    Ok(IndexKeyParts {
        type_tag,
        name,
        value,
        id,
    })
}

/// Key of the reference entry listing the index keys written for an object.
pub fn reference_key(object_key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(object_key.len());
    buf.push(REFERENCE_MARKER);
    buf.push(TERMINATOR);
    buf.extend_from_slice(object_key.get(2..).unwrap_or_default());
    buf
}

/// Key of the type-table entry for `type_name`.
pub fn type_key(type_name: &str) -> Result<Vec<u8>, KeyError> {
    if type_name.as_bytes().contains(&TERMINATOR) {
        return Err(KeyError::InvalidName(type_name.to_string()));
    }
    let mut buf = family_prefix(TYPE_MARKER);
    buf.extend_from_slice(type_name.as_bytes());
    Ok(buf)
}

/// Type name stored in a type-table key.
pub fn decode_type_key(bytes: &[u8]) -> Result<String, KeyError> {
    match bytes {
        [TYPE_MARKER, TERMINATOR, name @ ..] => String::from_utf8(name.to_vec())
            .map_err(|e| KeyError::Malformed(format!("type name is not UTF-8: {e}"))),
        _ => Err(KeyError::Malformed("expected 't' key header".into())),
    }
}

/// Drop the final terminator so the prefix also matches longer last fields.
fn open_up(mut prefix: Vec<u8>, value: &Value, is_open: bool) -> Vec<u8> {
    if is_open && !value.is_empty() {
        prefix.pop();
    }
    prefix
}

/// Scan prefix over objects of `tag`, optionally narrowed to an id.
///
/// A closed id matches documents whose primary key starts with all of its
/// fields. An open id also matches when the last field is only a byte prefix
/// of the stored field.
pub fn object_prefix(tag: TypeTag, id: Option<&Value>, is_open: bool) -> Result<Vec<u8>, KeyError> {
    match id {
        None => Ok(header(OBJECT_MARKER, tag, 0)),
        Some(id) => Ok(open_up(encode_object_key(tag, id)?, id, is_open)),
    }
}

/// Scan prefix over entries of index `name` of `tag`, optionally narrowed to
/// a value. Open and closed values behave as in [`object_prefix`].
pub fn index_prefix(
    tag: TypeTag,
    name: &str,
    value: Option<&Value>,
    is_open: bool,
) -> Result<Vec<u8>, KeyError> {
    match value {
        None => {
            let mut buf = header(INDEX_MARKER, tag, name.len() + 1);
            push_name(&mut buf, name)?;
            Ok(buf)
        }
        Some(value) => Ok(open_up(
            encode_index_key(tag, name, value, &[])?,
            value,
            is_open,
        )),
    }
}
