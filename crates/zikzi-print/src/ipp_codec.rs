// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP/1.1 message codec for the gateway's print endpoint.
//
// Clients send Print-Job, Validate-Job, Cancel-Job, Get-Job-Attributes,
// Get-Jobs and Get-Printer-Attributes.  Replies carry an operation group
// (charset, language, status-message) and then job or printer groups.
// Every reply echoes the request-id, and the request-id of an undecodable
// body is recovered where possible so clients can still match the error.

use thiserror::Error;
use tracing::warn;

/// Version written into replies that have no request to echo.
pub const IPP_VERSION_MAJOR: u8 = 0x01;
pub const IPP_VERSION_MINOR: u8 = 0x01;

/// version(2) + operation or status(2) + request-id(4).
pub const HEADER_LEN: usize = 8;

// Group delimiters.
pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;
pub const TAG_PRINTER_ATTRIBUTES: u8 = 0x04;

/// Tags at or below this value open a group; anything above is a value tag.
const MAX_DELIMITER_TAG: u8 = 0x0F;

// Value tags the gateway reads or emits.
pub const VALUE_TAG_INTEGER: u8 = 0x21;
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;
pub const VALUE_TAG_ENUM: u8 = 0x23;
pub const VALUE_TAG_TEXT: u8 = 0x41;
pub const VALUE_TAG_NAME: u8 = 0x42;
pub const VALUE_TAG_KEYWORD: u8 = 0x44;
pub const VALUE_TAG_URI: u8 = 0x45;
pub const VALUE_TAG_CHARSET: u8 = 0x47;
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;
pub const VALUE_TAG_MIME_MEDIA_TYPE: u8 = 0x49;

// Operations the print endpoint answers.
pub const OP_PRINT_JOB: u16 = 0x0002;
pub const OP_VALIDATE_JOB: u16 = 0x0004;
pub const OP_CANCEL_JOB: u16 = 0x0008;
pub const OP_GET_JOB_ATTRIBUTES: u16 = 0x0009;
pub const OP_GET_JOBS: u16 = 0x000A;
pub const OP_GET_PRINTER_ATTRIBUTES: u16 = 0x000B;

// Status codes the gateway replies with.
pub const STATUS_OK: u16 = 0x0000;
pub const STATUS_CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;
/// Returned when a request arrives without a resolvable user.
pub const STATUS_CLIENT_ERROR_NOT_AUTHORIZED: u16 = 0x0403;
pub const STATUS_CLIENT_ERROR_NOT_FOUND: u16 = 0x0406;
pub const STATUS_SERVER_ERROR_INTERNAL: u16 = 0x0500;
pub const STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;

// job-state values for the stored job statuses, and the fixed printer-state.
pub const JOB_STATE_PENDING: i32 = 3;
pub const JOB_STATE_PROCESSING: i32 = 5;
pub const JOB_STATE_ABORTED: i32 = 8;
pub const JOB_STATE_COMPLETED: i32 = 9;
pub const PRINTER_STATE_IDLE: i32 = 3;

/// Why a request body could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IppDecodeError {
    #[error("IPP message too short: {0} bytes (minimum 8)")]
    TooShort(usize),

    #[error("truncated {0}")]
    Truncated(&'static str),
}

#[derive(Debug, Clone)]
pub struct IppAttribute {
    pub value_tag: u8,
    /// Empty for additional values of a 1setOf.
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct IppAttributeGroup {
    pub delimiter: u8,
    pub attributes: Vec<IppAttribute>,
}

impl IppAttributeGroup {
    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|a| String::from_utf8(a.value.clone()).ok())
    }

    /// `job-id` and the like; rejects values that are not exactly 4 bytes.
    pub fn get_integer(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(|a| {
            let bytes: [u8; 4] = a.value.as_slice().try_into().ok()?;
            Some(i32::from_be_bytes(bytes))
        })
    }
}

/// A decoded request (or, in tests, a decoded reply).
#[derive(Debug, Clone)]
pub struct IppRequest {
    pub version_major: u8,
    pub version_minor: u8,
    /// Holds the status code when the message is a reply.
    pub operation_id: u16,
    pub request_id: u32,
    pub attribute_groups: Vec<IppAttributeGroup>,
    /// The print payload of a Print-Job.
    pub document_data: Vec<u8>,
}

impl IppRequest {
    pub fn operation_attributes(&self) -> Option<&IppAttributeGroup> {
        self.group(TAG_OPERATION_ATTRIBUTES)
    }

    pub fn group(&self, delimiter: u8) -> Option<&IppAttributeGroup> {
        self.attribute_groups
            .iter()
            .find(|g| g.delimiter == delimiter)
    }

    pub fn operation_string(&self, name: &str) -> Option<String> {
        self.operation_attributes()
            .and_then(|group| group.get_string(name))
    }

    pub fn status_code(&self) -> u16 {
        self.operation_id
    }
}

/// Decode a request body.
///
/// Groups are read attribute by attribute until the end-of-attributes tag;
/// the payload is whatever follows it, so a 0x03 byte inside an attribute
/// value never splits the document.  A body that ends without the tag has
/// no payload.
pub fn parse_ipp_request(data: &[u8]) -> Result<IppRequest, IppDecodeError> {
    if data.len() < HEADER_LEN {
        return Err(IppDecodeError::TooShort(data.len()));
    }

    let mut reader = Reader { data, pos: HEADER_LEN };
    let mut attribute_groups: Vec<IppAttributeGroup> = Vec::new();

    while let Some(tag) = reader.next_byte() {
        if tag == TAG_END_OF_ATTRIBUTES {
            break;
        }
        if tag <= MAX_DELIMITER_TAG {
            attribute_groups.push(IppAttributeGroup {
                delimiter: tag,
                attributes: Vec::new(),
            });
            continue;
        }

        let attr = reader.attribute(tag)?;
        match attribute_groups.last_mut() {
            Some(group) => group.attributes.push(attr),
            None => warn!(name = %attr.name, "IPP attribute before any group, discarded"),
        }
    }

    Ok(IppRequest {
        version_major: data[0],
        version_minor: data[1],
        operation_id: u16::from_be_bytes([data[2], data[3]]),
        request_id: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        attribute_groups,
        document_data: reader.rest().to_vec(),
    })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn next_byte(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// value-tag already consumed; name and value are u16-length-prefixed.
    fn attribute(&mut self, value_tag: u8) -> Result<IppAttribute, IppDecodeError> {
        let name = self.prefixed("attribute name")?;
        let value = self.prefixed("attribute value")?;
        Ok(IppAttribute {
            value_tag,
            name: String::from_utf8_lossy(name).into_owned(),
            value: value.to_vec(),
        })
    }

    fn prefixed(&mut self, what: &'static str) -> Result<&'a [u8], IppDecodeError> {
        let len = self.bytes(2, what)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        self.bytes(len, what)
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], IppDecodeError> {
        let slice = self
            .data
            .get(self.pos..)
            .and_then(|rest| rest.get(..len))
            .ok_or(IppDecodeError::Truncated(what))?;
        self.pos += len;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }
}

/// Reply encoder.  Groups are opened with `begin_group` and closed
/// implicitly by the next group or by `build`.
#[derive(Debug)]
pub struct IppResponseBuilder {
    buf: Vec<u8>,
}

impl IppResponseBuilder {
    /// Start an IPP/1.1 response with the given status code and request-id.
    pub fn new(status_code: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(IPP_VERSION_MAJOR);
        buf.push(IPP_VERSION_MINOR);
        buf.extend_from_slice(&status_code.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        Self { buf }
    }

    /// Start a response that echoes the request's version and request-id.
    pub fn reply_to(request: &IppRequest, status_code: u16) -> Self {
        let mut builder = Self::new(status_code, request.request_id);
        builder.version(request.version_major, request.version_minor);
        builder
    }

    /// Override the version-number bytes.
    pub fn version(&mut self, major: u8, minor: u8) -> &mut Self {
        self.buf[0] = major;
        self.buf[1] = minor;
        self
    }

    /// Start a new attribute group.
    pub fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    /// Operation group with the mandatory charset and language attributes.
    pub fn operation_group(&mut self) -> &mut Self {
        self.begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en")
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_TEXT, name, value.as_bytes())
    }

    pub fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NAME, name, value.as_bytes())
    }

    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_KEYWORD, name, value.as_bytes())
    }

    /// A keyword attribute with one or more values.
    pub fn keywords(&mut self, name: &str, values: &[&str]) -> &mut Self {
        self.set_of(VALUE_TAG_KEYWORD, name, values)
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_URI, name, value.as_bytes())
    }

    pub fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_CHARSET, name, value.as_bytes())
    }

    pub fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.write_attr(VALUE_TAG_NATURAL_LANGUAGE, name, value.as_bytes())
    }

    /// A mimeMediaType attribute with one or more values.
    pub fn mime_types(&mut self, name: &str, values: &[&str]) -> &mut Self {
        self.set_of(VALUE_TAG_MIME_MEDIA_TYPE, name, values)
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_INTEGER, name, &value.to_be_bytes())
    }

    /// Enum attribute (same wire encoding as integer).
    pub fn enum_attr(&mut self, name: &str, value: i32) -> &mut Self {
        self.write_attr(VALUE_TAG_ENUM, name, &value.to_be_bytes())
    }

    /// An enum attribute with one or more values.
    pub fn enums(&mut self, name: &str, values: &[i32]) -> &mut Self {
        for (i, value) in values.iter().enumerate() {
            let name = if i == 0 { name } else { "" };
            self.write_attr(VALUE_TAG_ENUM, name, &value.to_be_bytes());
        }
        self
    }

    pub fn boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.write_attr(VALUE_TAG_BOOLEAN, name, &[u8::from(value)])
    }

    /// Write a raw attribute (value-tag, name, value bytes).
    pub fn write_attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        self.buf.push(value_tag);
        let name_bytes = name.as_bytes();
        self.buf
            .extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name_bytes);
        self.buf
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    fn set_of(&mut self, value_tag: u8, name: &str, values: &[&str]) -> &mut Self {
        for (i, value) in values.iter().enumerate() {
            let name = if i == 0 { name } else { "" };
            self.write_attr(value_tag, name, value.as_bytes());
        }
        self
    }

    /// Write the end-of-attributes tag and return the bytes.
    pub fn build(mut self) -> Vec<u8> {
        self.buf.push(TAG_END_OF_ATTRIBUTES);
        self.buf
    }
}

/// A response carrying only the operation group and a status message.
pub fn error_response(
    version: (u8, u8),
    status: u16,
    request_id: u32,
    message: &str,
) -> Vec<u8> {
    let mut builder = IppResponseBuilder::new(status, request_id);
    builder
        .version(version.0, version.1)
        .operation_group()
        .text("status-message", message);
    builder.build()
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Encode a request with the mandatory operation attributes plus `attributes`.
#[cfg(test)]
pub(crate) fn build_test_ipp_request(
    operation_id: u16,
    request_id: u32,
    attributes: &[(u8, &str, &[u8])],
    document_data: &[u8],
) -> Vec<u8> {
    let mut buf = vec![IPP_VERSION_MAJOR, IPP_VERSION_MINOR];
    buf.extend_from_slice(&operation_id.to_be_bytes());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.push(TAG_OPERATION_ATTRIBUTES);
    write_test_attr(&mut buf, VALUE_TAG_CHARSET, "attributes-charset", b"utf-8");
    write_test_attr(
        &mut buf,
        VALUE_TAG_NATURAL_LANGUAGE,
        "attributes-natural-language",
        b"en",
    );
    for &(tag, name, value) in attributes {
        write_test_attr(&mut buf, tag, name, value);
    }
    buf.push(TAG_END_OF_ATTRIBUTES);
    buf.extend_from_slice(document_data);
    buf
}

#[cfg(test)]
fn write_test_attr(buf: &mut Vec<u8>, value_tag: u8, name: &str, value: &[u8]) {
    buf.push(value_tag);
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
