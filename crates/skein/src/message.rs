use std::mem::size_of;

use bytemuck::Pod;

use crate::buffer::ByteBuffer;

pub const DISCOVERY_MAGIC: u32 = 0x534B_4E31;
pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_CHAT_LENGTH: usize = 512;

const KIND_HELLO: u8 = 1;
const KIND_WELCOME: u8 = 2;
const KIND_CHAT: u8 = 3;
const KIND_LEAVE: u8 = 4;
const KIND_DISCOVER: u8 = 5;
const KIND_ANNOUNCE: u8 = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message is truncated")]
    Truncated,

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("discovery magic mismatch: {0:#010x}")]
    BadMagic(u32),

    #[error("chat length field says {declared} bytes but the text takes {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Application messages exchanged by the relay server and its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Hello {
        name: String,
    },
    Welcome {
        object: u32,
    },
    Chat {
        urgent: bool,
        from_server: bool,
        from: u32,
        text: String,
    },
    Leave {
        object: u32,
    },
    Discover,
    Announce {
        port: u16,
        players: u16,
        name: String,
    },
}

impl RelayMessage {
    pub fn chat(from: u32, text: impl Into<String>) -> Self {
        Self::Chat {
            urgent: false,
            from_server: false,
            from,
            text: text.into(),
        }
    }

    pub fn server_notice(text: impl Into<String>) -> Self {
        Self::Chat {
            urgent: true,
            from_server: true,
            from: 0,
            text: text.into(),
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Self::Hello { .. } => KIND_HELLO,
            Self::Welcome { .. } => KIND_WELCOME,
            Self::Chat { .. } => KIND_CHAT,
            Self::Leave { .. } => KIND_LEAVE,
            Self::Discover => KIND_DISCOVER,
            Self::Announce { .. } => KIND_ANNOUNCE,
        }
    }

    /// Strings are truncated to their limits and stripped of NUL bytes.
    pub fn encode(&self) -> ByteBuffer {
        let mut buffer = ByteBuffer::new();
        buffer.write::<u8>(self.kind());

        match self {
            Self::Hello { name } => {
                buffer.write_string(&sanitize(name, MAX_NAME_LENGTH));
            }
            Self::Welcome { object } | Self::Leave { object } => {
                buffer.write::<u32>(*object);
            }
            Self::Chat {
                urgent,
                from_server,
                from,
                text,
            } => {
                buffer.write_bit(*urgent);
                buffer.write_bit(*from_server);
                buffer.write::<u32>(*from);

                let length_offset = buffer.write::<u16>(0);
                buffer.write_string(&sanitize(text, MAX_CHAT_LENGTH));
                let length = buffer.current_size() - length_offset - size_of::<u16>();
                buffer.write_at(length_offset, length as u16);
            }
            Self::Discover => {
                buffer.write::<u32>(DISCOVERY_MAGIC);
            }
            Self::Announce {
                port,
                players,
                name,
            } => {
                buffer.write::<u32>(DISCOVERY_MAGIC);
                buffer.write::<u16>(*port);
                buffer.write::<u16>(*players);
                buffer.write_string(&sanitize(name, MAX_NAME_LENGTH));
            }
        }

        buffer.shrink();
        buffer
    }

    /// Reads one message from the cursor. Every field is length-checked first,
    /// so hostile input yields an error rather than a panic.
    pub fn decode(buffer: &mut ByteBuffer) -> Result<Self, MessageError> {
        let kind = take::<u8>(buffer)?;

        let message = match kind {
            KIND_HELLO => Self::Hello {
                name: take_string(buffer)?,
            },
            KIND_WELCOME => Self::Welcome {
                object: take::<u32>(buffer)?,
            },
            KIND_CHAT => {
                if buffer.remaining() < 1 {
                    return Err(MessageError::Truncated);
                }
                let urgent = buffer.read_bit();
                let from_server = buffer.read_bit();
                let from = take::<u32>(buffer)?;

                let declared = usize::from(take::<u16>(buffer)?);
                let before = buffer.remaining();
                let text = take_string(buffer)?;
                let actual = before - buffer.remaining();
                if declared != actual {
                    return Err(MessageError::LengthMismatch { declared, actual });
                }

                Self::Chat {
                    urgent,
                    from_server,
                    from,
                    text,
                }
            }
            KIND_LEAVE => Self::Leave {
                object: take::<u32>(buffer)?,
            },
            KIND_DISCOVER => {
                check_magic(buffer)?;
                Self::Discover
            }
            KIND_ANNOUNCE => {
                check_magic(buffer)?;
                Self::Announce {
                    port: take::<u16>(buffer)?,
                    players: take::<u16>(buffer)?,
                    name: take_string(buffer)?,
                }
            }
            other => return Err(MessageError::UnknownKind(other)),
        };

        Ok(message)
    }
}

fn take<T: Pod>(buffer: &mut ByteBuffer) -> Result<T, MessageError> {
    if buffer.remaining() < size_of::<T>() {
        return Err(MessageError::Truncated);
    }
    Ok(buffer.read::<T>())
}

fn take_string(buffer: &mut ByteBuffer) -> Result<String, MessageError> {
    buffer
        .try_read_string()
        .map(|s| s.into_owned())
        .ok_or(MessageError::Truncated)
}

fn check_magic(buffer: &mut ByteBuffer) -> Result<(), MessageError> {
    match take::<u32>(buffer)? {
        DISCOVERY_MAGIC => Ok(()),
        other => Err(MessageError::BadMagic(other)),
    }
}

fn sanitize(value: &str, max_bytes: usize) -> String {
    let mut out = String::with_capacity(value.len().min(max_bytes));
    for c in value.chars().filter(|&c| c != '\0') {
        if out.len() + c.len_utf8() > max_bytes {
            break;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_bytes(bytes: &[u8]) -> Result<RelayMessage, MessageError> {
        RelayMessage::decode(&mut ByteBuffer::from_slice(bytes))
    }

    #[test]
    fn test_chat_round_trip() {
        let message = RelayMessage::Chat {
            urgent: true,
            from_server: false,
            from: 42,
            text: "hi there".to_string(),
        };
        let mut buffer = message.encode();
        assert_eq!(buffer.allocated_size(), buffer.current_size());

        buffer.start_read();
        assert_eq!(RelayMessage::decode(&mut buffer), Ok(message));
        assert!(buffer.end());
    }

    #[test]
    fn test_chat_flags_share_one_byte() {
        let buffer = RelayMessage::server_notice("x").encode();
        let bytes = buffer.as_bytes();
        assert_eq!(bytes[0], KIND_CHAT);
        assert_eq!(bytes[1], 0b11);
        // kind, flags, from, length, "x\0"
        assert_eq!(bytes.len(), 1 + 1 + 4 + 2 + 2);
    }

    #[test]
    fn test_chat_length_is_patched() {
        let buffer = RelayMessage::chat(1, "abcd").encode();
        let bytes = buffer.as_bytes();
        let length = u16::from_ne_bytes([bytes[6], bytes[7]]);
        assert_eq!(length, 5);
    }

    #[test]
    fn test_chat_length_mismatch() {
        let mut bytes = RelayMessage::chat(1, "abcd").encode().into_bytes();
        bytes[6..8].copy_from_slice(&9u16.to_ne_bytes());
        assert_eq!(
            decode_bytes(&bytes),
            Err(MessageError::LengthMismatch {
                declared: 9,
                actual: 5
            })
        );
    }

    #[test]
    fn test_announce_round_trip() {
        let message = RelayMessage::Announce {
            port: 27015,
            players: 3,
            name: "lan party".to_string(),
        };
        let bytes = message.encode().into_bytes();
        assert_eq!(decode_bytes(&bytes), Ok(message));
    }

    #[test]
    fn test_discover_requires_magic() {
        let mut bytes = RelayMessage::Discover.encode().into_bytes();
        assert_eq!(decode_bytes(&bytes), Ok(RelayMessage::Discover));

        bytes[1] ^= 0xFF;
        assert!(matches!(
            decode_bytes(&bytes),
            Err(MessageError::BadMagic(_))
        ));
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(decode_bytes(&[]), Err(MessageError::Truncated));
        assert_eq!(
            decode_bytes(&[KIND_WELCOME, 1, 2]),
            Err(MessageError::Truncated)
        );
        assert_eq!(
            decode_bytes(&[KIND_HELLO, b'a', b'b']),
            Err(MessageError::Truncated)
        );
        assert_eq!(decode_bytes(&[KIND_CHAT]), Err(MessageError::Truncated));
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(decode_bytes(&[200]), Err(MessageError::UnknownKind(200)));
    }

    #[test]
    fn test_names_are_sanitized() {
        let long = "n\0".repeat(40);
        let message = RelayMessage::Hello { name: long };
        let bytes = message.encode().into_bytes();

        match decode_bytes(&bytes) {
            Ok(RelayMessage::Hello { name }) => {
                assert_eq!(name.len(), MAX_NAME_LENGTH);
                assert!(name.chars().all(|c| c == 'n'));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sanitize_respects_char_boundaries() {
        assert_eq!(sanitize("ééé", 5), "éé");
    }
}
