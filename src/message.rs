//! SOME/IP message handling.

use std::time::Instant;

use bytes::Bytes;

use crate::e2e::header::{E2eHeader, E2E_HEADER_SIZE};
use crate::error::{Result, SomeIpError};
use crate::header::{ClientId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
use crate::types::{MessageType, ReturnCode, INTERFACE_VERSION, MAX_TCP_PAYLOAD_SIZE, PROTOCOL_VERSION};

/// A complete SOME/IP message: header, optional E2E header and payload.
///
/// The E2E header, when present, sits between the fixed header and the
/// payload on the wire and is accounted for in the length field. The wire
/// format does not self-identify E2E presence; on receive it is inferred
/// from length arithmetic plus a content heuristic (see `from_bytes`).
#[derive(Debug, Clone)]
pub struct SomeIpMessage {
    /// Message header.
    pub header: SomeIpHeader,
    /// Optional E2E protection header.
    pub e2e_header: Option<E2eHeader>,
    /// Message payload.
    pub payload: Bytes,
    /// Local receive/creation time. Not part of the wire format and
    /// ignored by equality.
    pub timestamp: Option<Instant>,
}

impl PartialEq for SomeIpMessage {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header
            && self.e2e_header == other.e2e_header
            && self.payload == other.payload
    }
}

impl Eq for SomeIpMessage {}

impl SomeIpMessage {
    /// Create a new message with the given header and payload.
    pub fn new(mut header: SomeIpHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.length = 8 + payload.len() as u32;
        Self {
            header,
            e2e_header: None,
            payload,
            timestamp: Some(Instant::now()),
        }
    }

    /// Create a request message builder.
    pub fn request(service_id: ServiceId, method_id: MethodId) -> MessageBuilder {
        MessageBuilder::new(service_id, method_id, MessageType::Request)
    }

    /// Create a request-no-return message builder.
    pub fn request_no_return(service_id: ServiceId, method_id: MethodId) -> MessageBuilder {
        MessageBuilder::new(service_id, method_id, MessageType::RequestNoReturn)
    }

    /// Create a notification message builder.
    pub fn notification(service_id: ServiceId, method_id: MethodId) -> MessageBuilder {
        MessageBuilder::new(service_id, method_id, MessageType::Notification)
    }

    /// Create a response to this message.
    pub fn create_response(&self) -> MessageBuilder {
        let mut builder = MessageBuilder::new(
            self.header.service_id,
            self.header.method_id,
            MessageType::Response,
        );
        builder.client_id = self.header.client_id;
        builder.session_id = self.header.session_id;
        builder.interface_version = self.header.interface_version;
        builder
    }

    /// Create an error response to this message.
    pub fn create_error_response(&self, return_code: ReturnCode) -> MessageBuilder {
        let mut builder = self.create_response();
        builder.message_type = MessageType::Error;
        builder.return_code = return_code;
        builder
    }

    /// Size of the E2E header portion (0 or 12).
    pub fn e2e_size(&self) -> usize {
        if self.e2e_header.is_some() {
            E2E_HEADER_SIZE
        } else {
            0
        }
    }

    /// Check whether an E2E header is present.
    pub fn has_e2e_header(&self) -> bool {
        self.e2e_header.is_some()
    }

    /// Install an E2E header. The length field follows immediately.
    pub fn set_e2e_header(&mut self, header: E2eHeader) {
        self.e2e_header = Some(header);
        self.update_length();
    }

    /// Remove the E2E header. The length field follows immediately.
    pub fn clear_e2e_header(&mut self) {
        self.e2e_header = None;
        self.update_length();
    }

    /// Replace the payload, keeping the length field consistent.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
        self.update_length();
    }

    /// Recompute `length = 8 + e2e_size + payload.len()`.
    pub fn update_length(&mut self) {
        self.header.length = 8 + self.e2e_size() as u32 + self.payload.len() as u32;
    }

    /// Parse a message from bytes.
    ///
    /// After the fixed header, an E2E header is assumed present iff the
    /// length arithmetic leaves room for one *and* the candidate bytes do
    /// not look like payload: the data id must be non-zero, at least one
    /// of crc/counter/freshness must be non-zero, and none of those fields
    /// may consist of a single repeated byte. Uniform test payloads would
    /// otherwise masquerade as E2E headers.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = SomeIpHeader::from_bytes(data)?;
        let length = header.length;

        if length < 8 {
            return Err(SomeIpError::malformed(format!(
                "length field {length} below minimum of 8"
            )));
        }

        let mut e2e_header = None;
        let mut offset = HEADER_SIZE;

        let remaining = data.len() - HEADER_SIZE;
        if remaining >= E2E_HEADER_SIZE && length as usize >= 8 + E2E_HEADER_SIZE {
            let expected_payload = length as usize - 8 - E2E_HEADER_SIZE;
            if data.len() == HEADER_SIZE + E2E_HEADER_SIZE + expected_payload {
                if let Ok(candidate) =
                    E2eHeader::from_bytes(&data[HEADER_SIZE..HEADER_SIZE + E2E_HEADER_SIZE])
                {
                    if candidate.data_id != 0
                        && (candidate.crc != 0
                            || candidate.counter != 0
                            || candidate.freshness != 0)
                        && !looks_like_payload(&candidate)
                    {
                        e2e_header = Some(candidate);
                        offset += E2E_HEADER_SIZE;
                    }
                }
            }
        }

        let e2e_size = if e2e_header.is_some() { E2E_HEADER_SIZE } else { 0 };
        let expected_payload = length as usize - 8 - e2e_size;
        let actual_payload = data.len() - offset;
        if actual_payload != expected_payload {
            return Err(SomeIpError::malformed(format!(
                "length field says {expected_payload} payload bytes, got {actual_payload}"
            )));
        }

        let message = Self {
            header,
            e2e_header,
            payload: Bytes::copy_from_slice(&data[offset..]),
            timestamp: Some(Instant::now()),
        };

        if !message.is_valid() {
            return Err(SomeIpError::malformed("message failed validation"));
        }

        Ok(message)
    }

    /// Serialize the message to bytes.
    ///
    /// The length field is emitted as stored; mutating accessors keep it
    /// consistent, so callers using them need no extra step.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&self.header.to_bytes());
        if let Some(e2e) = &self.e2e_header {
            buf.extend_from_slice(&e2e.to_bytes());
        }
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Get the total message size (header + E2E header + payload).
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.e2e_size() + self.payload.len()
    }

    /// Validate header fields, length consistency and payload size.
    pub fn is_valid(&self) -> bool {
        if self.header.protocol_version != PROTOCOL_VERSION {
            return false;
        }
        if self.header.interface_version != INTERFACE_VERSION {
            return false;
        }
        if !self.has_valid_method_id() {
            return false;
        }
        let expected_length = 8 + self.e2e_size() as u32 + self.payload.len() as u32;
        if self.header.length != expected_length {
            return false;
        }
        self.payload.len() <= MAX_TCP_PAYLOAD_SIZE
    }

    /// Method ID 0xFFFF is reserved and rejected.
    pub fn has_valid_method_id(&self) -> bool {
        self.header.method_id != MethodId::RESERVED
    }

    /// Check if this message is a request.
    pub fn is_request(&self) -> bool {
        matches!(
            self.header.message_type,
            MessageType::Request | MessageType::TpRequest
        )
    }

    /// Check if this message is a response.
    pub fn is_response(&self) -> bool {
        self.header.message_type.is_response()
    }

    /// Check if this message expects a response.
    pub fn expects_response(&self) -> bool {
        self.header.message_type.expects_response()
    }

    /// Get the service ID.
    pub fn service_id(&self) -> ServiceId {
        self.header.service_id
    }

    /// Get the method ID.
    pub fn method_id(&self) -> MethodId {
        self.header.method_id
    }

    /// Get the client ID.
    pub fn client_id(&self) -> ClientId {
        self.header.client_id
    }

    /// Get the session ID.
    pub fn session_id(&self) -> SessionId {
        self.header.session_id
    }

    /// Get the return code.
    pub fn return_code(&self) -> ReturnCode {
        self.header.return_code
    }
}

impl std::fmt::Display for SomeIpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message{{service_id={}, method_id={}, client_id={}, session_id={}, type={:?}, \
             return_code={:?}, length={}, payload_size={}}}",
            self.header.service_id,
            self.header.method_id,
            self.header.client_id,
            self.header.session_id,
            self.header.message_type,
            self.header.return_code,
            self.header.length,
            self.payload.len()
        )
    }
}

/// Repeated-byte fields indicate uniform payload data, not a real header.
fn looks_like_payload(header: &E2eHeader) -> bool {
    let crc = header.crc.to_be_bytes();
    if crc[0] == crc[1] && crc[1] == crc[2] && crc[2] == crc[3] {
        return true;
    }
    let counter = header.counter.to_be_bytes();
    if counter[0] == counter[1] && counter[1] == counter[2] && counter[2] == counter[3] {
        return true;
    }
    let freshness = header.freshness.to_be_bytes();
    freshness[0] == freshness[1]
}

/// Builder for constructing SOME/IP messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    service_id: ServiceId,
    method_id: MethodId,
    client_id: ClientId,
    session_id: SessionId,
    interface_version: u8,
    message_type: MessageType,
    return_code: ReturnCode,
    payload: Bytes,
}

impl MessageBuilder {
    /// Create a new message builder.
    pub fn new(service_id: ServiceId, method_id: MethodId, message_type: MessageType) -> Self {
        Self {
            service_id,
            method_id,
            client_id: ClientId::default(),
            session_id: SessionId::default(),
            interface_version: INTERFACE_VERSION,
            message_type,
            return_code: ReturnCode::Ok,
            payload: Bytes::new(),
        }
    }

    /// Set the client ID.
    pub fn client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the session ID.
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the return code.
    pub fn return_code(mut self, code: ReturnCode) -> Self {
        self.return_code = code;
        self
    }

    /// Set the payload from bytes.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the payload from a Vec<u8>.
    pub fn payload_vec(mut self, payload: Vec<u8>) -> Self {
        self.payload = Bytes::from(payload);
        self
    }

    /// Build the message.
    pub fn build(self) -> SomeIpMessage {
        let header = SomeIpHeader {
            service_id: self.service_id,
            method_id: self.method_id,
            length: 8 + self.payload.len() as u32,
            client_id: self.client_id,
            session_id: self.session_id,
            protocol_version: PROTOCOL_VERSION,
            interface_version: self.interface_version,
            message_type: self.message_type,
            return_code: self.return_code,
        };

        SomeIpMessage {
            header,
            e2e_header: None,
            payload: self.payload,
            timestamp: Some(Instant::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_message_bytes() {
        let msg = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x5678))
            .client_id(ClientId(0x9ABC))
            .session_id(SessionId(0xDEF0))
            .build();

        let bytes = msg.to_bytes();
        assert_eq!(
            bytes,
            [
                0x12, 0x34, 0x56, 0x78, 0x00, 0x00, 0x00, 0x08, 0x9A, 0xBC, 0xDE, 0xF0, 0x01,
                0x01, 0x00, 0x00
            ]
        );

        let parsed = SomeIpMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, msg);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_message_roundtrip() {
        let original = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x5678))
            .client_id(ClientId(0xABCD))
            .session_id(SessionId(0x0001))
            .payload_vec(vec![1, 2, 3, 4, 5])
            .build();

        let bytes = original.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 5);

        let parsed = SomeIpMessage::from_bytes(&bytes).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_e2e_roundtrip() {
        let mut msg = SomeIpMessage::notification(ServiceId(0x1111), MethodId(0x8002))
            .payload_vec(vec![0xDE, 0xAD, 0xBE, 0xEF])
            .build();
        msg.set_e2e_header(E2eHeader {
            crc: 0x1234_5678,
            counter: 7,
            data_id: 0x0042,
            freshness: 0x1F2E,
        });

        assert_eq!(msg.header.length, 8 + 12 + 4);

        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 12 + 4);

        let parsed = SomeIpMessage::from_bytes(&bytes).unwrap();
        assert!(parsed.has_e2e_header());
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_e2e_heuristic_rejects_uniform_payload() {
        // 12 bytes of 0xAA parse as payload, not as an E2E header: every
        // candidate field is a repeated-byte pattern.
        let msg = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .payload_vec(vec![0xAA; 12])
            .build();

        let parsed = SomeIpMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert!(!parsed.has_e2e_header());
        assert_eq!(parsed.payload.as_ref(), &[0xAA; 12]);
    }

    #[test]
    fn test_clear_e2e_header_updates_length() {
        let mut msg = SomeIpMessage::request(ServiceId(1), MethodId(1))
            .payload_vec(vec![0; 10])
            .build();
        msg.set_e2e_header(E2eHeader::default());
        assert_eq!(msg.header.length, 30);
        msg.clear_e2e_header();
        assert_eq!(msg.header.length, 18);
        assert!(msg.is_valid());
    }

    #[test]
    fn test_reserved_method_id_invalid() {
        let msg = SomeIpMessage::request(ServiceId(0x1234), MethodId(0xFFFF)).build();
        assert!(!msg.is_valid());
        assert!(SomeIpMessage::from_bytes(&msg.to_bytes()).is_err());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let msg = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .payload_vec(vec![1, 2, 3])
            .build();
        let mut bytes = msg.to_bytes();
        bytes[7] = 0x10; // Claim more payload than present
        assert!(SomeIpMessage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_create_response() {
        let request = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .client_id(ClientId(0x0100))
            .session_id(SessionId(0x0042))
            .build();

        let response = request
            .create_response()
            .payload(b"response data".as_slice())
            .build();

        assert_eq!(response.header.service_id, request.header.service_id);
        assert_eq!(response.header.client_id, request.header.client_id);
        assert_eq!(response.header.session_id, request.header.session_id);
        assert_eq!(response.header.message_type, MessageType::Response);

        let error = request.create_error_response(ReturnCode::UnknownMethod).build();
        assert_eq!(error.header.message_type, MessageType::Error);
        assert_eq!(error.header.return_code, ReturnCode::UnknownMethod);
    }

    #[test]
    fn test_set_payload_updates_length() {
        let mut msg = SomeIpMessage::request(ServiceId(1), MethodId(1)).build();
        msg.set_payload(vec![0u8; 100]);
        assert_eq!(msg.header.length, 108);
        assert!(msg.is_valid());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(SomeIpMessage::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = SomeIpMessage::request(ServiceId(1), MethodId(2)).build();
        let mut b = a.clone();
        b.timestamp = None;
        assert_eq!(a, b);
    }
}
