//! Frame encoding for instructions and replies
//!
//! A frame is one version byte followed by the `bincode` encoding of an
//! [`Instruction`] or a [`Reply`].

use bytes::{BufMut, Bytes, BytesMut};
use fed_core::{
    EvaluateInstruction, EvaluateResult, FitInstruction, FitResult, GetParametersInstruction,
    Parameters, TransportError,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Frame format version
pub const FRAME_VERSION: u8 = 1;

/// Coordinator to client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    GetParameters(GetParametersInstruction),
    Fit(FitInstruction),
    Evaluate(EvaluateInstruction),
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::GetParameters(_) => "get_parameters",
            Instruction::Fit(_) => "fit",
            Instruction::Evaluate(_) => "evaluate",
        }
    }
}

/// Client to coordinator message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Parameters(Parameters),
    Fit(FitResult),
    Evaluate(EvaluateResult),
    Error { reason: String },
}

pub fn encode_instruction(instruction: &Instruction) -> Result<Bytes, TransportError> {
    encode(instruction)
}

pub fn decode_instruction(frame: &[u8]) -> Result<Instruction, TransportError> {
    decode(frame)
}

pub fn encode_reply(reply: &Reply) -> Result<Bytes, TransportError> {
    encode(reply)
}

pub fn decode_reply(frame: &[u8]) -> Result<Reply, TransportError> {
    decode(frame)
}

fn encode<T: Serialize>(message: &T) -> Result<Bytes, TransportError> {
    let body = bincode::serialize(message)
        .map_err(|e| TransportError::Malformed(format!("encode failed: {}", e)))?;
    let mut frame = BytesMut::with_capacity(body.len() + 1);
    frame.put_u8(FRAME_VERSION);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, TransportError> {
    let (&version, body) = frame
        .split_first()
        .ok_or_else(|| TransportError::Malformed("empty frame".to_string()))?;
    if version != FRAME_VERSION {
        return Err(TransportError::Malformed(format!(
            "unsupported frame version {}",
            version
        )));
    }
    bincode::deserialize(body).map_err(|e| TransportError::Malformed(e.to_string()))
}
