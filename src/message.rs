use std::borrow::Cow;
use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; anything larger is a corrupt stream.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// The five request and control methods a message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Error,
    Snapshot,
    Terminate,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "Get",
            Method::Put => "Put",
            Method::Error => "Error",
            Method::Snapshot => "Snapshot",
            Method::Terminate => "Terminate",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Method> {
        match tag {
            b"Get" => Some(Method::Get),
            b"Put" => Some(Method::Put),
            b"Error" => Some(Method::Error),
            b"Snapshot" => Some(Method::Snapshot),
            b"Terminate" => Some(Method::Terminate),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single wire unit. Serialized as exactly four frames: the method
/// tag, the sequence as 8 little-endian bytes, the key, and the body.
/// The key and body may be empty on control messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub method: Method,
    pub sequence: u64,
    pub key: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn get(key: impl Into<String>) -> Message {
        Message {
            method: Method::Get,
            sequence: 0,
            key: key.into(),
            body: Vec::new(),
        }
    }

    pub fn put(key: impl Into<String>, body: impl Into<Vec<u8>>) -> Message {
        Message {
            method: Method::Put,
            sequence: 0,
            key: key.into(),
            body: body.into(),
        }
    }

    pub fn error(sequence: u64, key: impl Into<String>, reason: &str) -> Message {
        Message {
            method: Method::Error,
            sequence,
            key: key.into(),
            body: reason.as_bytes().to_vec(),
        }
    }

    pub fn snapshot_request(sequence: u64) -> Message {
        Message {
            method: Method::Snapshot,
            sequence,
            key: String::new(),
            body: Vec::new(),
        }
    }

    pub fn terminate(sequence: u64) -> Message {
        Message {
            method: Method::Terminate,
            sequence,
            key: String::new(),
            body: Vec::new(),
        }
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Reads one message off the stream. Returns `Ok(None)` when the peer
/// closed the connection before the first frame.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let tag = match read_frame(reader).await {
        Ok(frame) => frame,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    let method = Method::from_tag(&tag)
        .ok_or_else(|| invalid_data(format!("unknown method tag {:?}", String::from_utf8_lossy(&tag))))?;

    let sequence = read_frame(reader).await?;
    let sequence: [u8; 8] = sequence
        .as_slice()
        .try_into()
        .map_err(|_| invalid_data(format!("sequence frame is {} bytes, expected 8", sequence.len())))?;
    let sequence = u64::from_le_bytes(sequence);

    let key = read_frame(reader).await?;
    let key = String::from_utf8(key).map_err(|err| invalid_data(err.to_string()))?;
    let body = read_frame(reader).await?;

    Ok(Some(Message {
        method,
        sequence,
        key,
        body,
    }))
}

/// Encodes the message into one buffer and writes it out, flushing so
/// peers see it promptly.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(4 * 4 + 9 + 8 + message.key.len() + message.body.len());
    push_frame(&mut encoded, message.method.as_str().as_bytes());
    push_frame(&mut encoded, &message.sequence.to_le_bytes());
    push_frame(&mut encoded, message.key.as_bytes());
    push_frame(&mut encoded, &message.body);
    writer.write_all(&encoded).await?;
    writer.flush().await
}

async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(invalid_data(format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte cap")));
    }
    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame).await?;
    Ok(frame)
}

fn push_frame(buf: &mut Vec<u8>, frame: &[u8]) {
    buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    buf.extend_from_slice(frame);
}

fn invalid_data(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}
