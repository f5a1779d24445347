//! Single-host coordination over a loopback TCP port.
//!
//! The first process to bind the port becomes the host; later
//! invocations connect as clients and hand their work over instead of
//! processing in parallel. Frames are JSON documents prefixed with a
//! 4-byte big-endian length.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol revision carried in every request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame a peer may send. Anything bigger is a corrupt or
/// hostile stream.
const MAX_FRAME: u32 = 1 << 20;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("oversized frame ({0} bytes)")]
    Oversized(u32),
    #[error("peer reported failure: {0}")]
    Rejected(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComCommand {
    /// Liveness probe; the host answers without side effects.
    #[serde(rename = "PING")]
    Ping,
    /// Hand a file over to the host for processing.
    #[serde(rename = "NEW")]
    New,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub ver: u32,
    pub req: ComCommand,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok { msg: String },
    Fail { error: String },
}

fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<(), ComError> {
    let body = serde_json::to_vec(value)?;
    let len = body.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&body)?;
    stream.flush()?;
    Ok(())
}

fn read_frame<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> Result<T, ComError> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len);
    if len > MAX_FRAME {
        return Err(ComError::Oversized(len));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

/// Client side: one request, one response, connection closed.
pub fn send(port: u16, req: ComCommand, args: Vec<String>) -> Result<Response, ComError> {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    write_frame(
        &mut stream,
        &Request {
            ver: PROTOCOL_VERSION,
            req,
            args,
        },
    )?;
    read_frame(&mut stream)
}

/// Probe whether a host already owns the port. A refused connection
/// means the port is free to claim.
pub fn host_alive(port: u16) -> bool {
    matches!(send(port, ComCommand::Ping, Vec::new()), Ok(Response::Ok { .. }))
}

/// Ask the running host to take over a file. `Err` with a connection
/// failure means there is no host and the caller should become one.
pub fn hand_over(port: u16, file: &Path) -> Result<(), ComError> {
    match send(port, ComCommand::New, vec![file.display().to_string()])? {
        Response::Ok { .. } => Ok(()),
        Response::Fail { error } => Err(ComError::Rejected(error)),
    }
}

/// Host side: bind the port and serve requests until the process exits.
/// `on_new` receives the file path of every accepted NEW request.
pub struct ComHandler {
    listener: TcpListener,
}

impl ComHandler {
    /// Bind the coordination port. Failure here means another host is
    /// already running.
    pub fn bind(port: u16) -> Result<Self, ComError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        Ok(Self { listener })
    }

    pub fn listen(self, mut on_new: impl FnMut(PathBuf) -> Result<(), String>) {
        for stream in self.listener.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("dropped connection: {}", err);
                    continue;
                }
            };
            let response = match read_frame::<Request>(&mut stream) {
                Ok(req) => Self::dispatch(req, &mut on_new),
                Err(err) => Response::Fail {
                    error: err.to_string(),
                },
            };
            if let Err(err) = write_frame(&mut stream, &response) {
                log::warn!("reply failed: {}", err);
            }
        }
    }

    fn dispatch(
        req: Request,
        on_new: &mut impl FnMut(PathBuf) -> Result<(), String>,
    ) -> Response {
        if req.ver != PROTOCOL_VERSION {
            return Response::Fail {
                error: format!("unsupported protocol version {}", req.ver),
            };
        }
        match req.req {
            ComCommand::Ping => Response::Ok {
                msg: "pong".to_string(),
            },
            ComCommand::New => {
                let Some(file) = req.args.first() else {
                    return Response::Fail {
                        error: "NEW requires a file argument".to_string(),
                    };
                };
                match on_new(PathBuf::from(file)) {
                    Ok(()) => Response::Ok {
                        msg: format!("accepted {}", file),
                    },
                    Err(error) => Response::Fail { error },
                }
            }
        }
    }
}
