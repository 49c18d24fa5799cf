use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const KIND_ERR: Header = 0;
const KIND_CONTROL: Header = 1;
const KIND_GRAD: Header = 2;
const KIND_PARAMS: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A gradient contribution or an averaged gradient.
    Grad(&'a [f32]),
    /// A full parameter snapshot.
    Params(&'a mut [f32]),
}

impl Payload<'_> {
    /// Size of the frame carrying `floats` values, kind header included.
    pub fn frame_len(floats: usize) -> usize {
        HEADER_SIZE + floats * size_of::<f32>()
    }
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Hello { rank: usize, world_size: usize },
    Disconnect,
}

/// The application layer message exchanged between workers.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short static name of the message kind, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Grad(_)) => "data/grad",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Err(_) => "err",
        }
    }

    fn invalid<T>(detail: String) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&KIND_ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&KIND_CONTROL.to_be_bytes());

                // SAFETY: `Command` derives `Serialize` and holds no maps, so writing
                //         it into a `Vec` cannot fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums): (Header, &[f32]) = match payload {
                    Payload::Grad(grad) => (KIND_GRAD, *grad),
                    Payload::Params(params) => (KIND_PARAMS, &**params),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::invalid(format!(
                "frame of {} bytes is smaller than the {HEADER_SIZE} byte header",
                buf.len()
            ));
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            KIND_ERR => {
                let detail = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(detail)))
            }
            KIND_CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (KIND_GRAD | KIND_PARAMS) => {
                let nums: &mut [f32] = bytemuck::try_cast_slice_mut(rest).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed f32 payload: {err}"),
                    )
                })?;

                let payload = if kind == KIND_GRAD {
                    Payload::Grad(nums)
                } else {
                    Payload::Params(nums)
                };

                Ok(Self::Data(payload))
            }
            other => Self::invalid(format!("received an invalid kind header {other}")),
        }
    }
}
