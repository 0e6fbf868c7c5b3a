//! The screenshot command exchange.
//!
//! [`capture_image`] drives an already-open [`Transport`] through the four
//! hardcopy commands, reads the transfer response, and returns the image
//! with its framing removed. Opening and closing the session is the
//! caller's job (see [`LecroyPlugin`](crate::plugin::LecroyPlugin)).

use std::time::Duration;

use lxishot_core::error::{Error, Result};
use lxishot_core::transport::Transport;
use tracing::{debug, warn};

use crate::protocol::{
    self, CMD_DELETE_FILE, CMD_HARDCOPY_SETUP, CMD_SCREEN_DUMP, CMD_TRANSFER_FILE,
    IMAGE_SIZE_MAX,
};

/// How a failed send of one step affects the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPolicy {
    /// The send result is ignored: failures are logged and the sequence
    /// continues.
    BestEffort,
    /// A failure aborts the capture.
    Required,
}

/// One command of the capture sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Short label for logs.
    pub name: &'static str,
    /// The command text sent to the instrument.
    pub command: &'static str,
    /// What to do if sending fails.
    pub policy: SendPolicy,
}

/// The command sequence, in the order it must be sent.
///
/// The delete must precede the hardcopy so that the file produced by
/// `scdp` gets the `00000` suffix that `TRFL?` asks for.
pub const CAPTURE_SEQUENCE: [Step; 4] = [
    Step {
        name: "delete_file",
        command: CMD_DELETE_FILE,
        policy: SendPolicy::BestEffort,
    },
    Step {
        name: "hardcopy_setup",
        command: CMD_HARDCOPY_SETUP,
        policy: SendPolicy::BestEffort,
    },
    Step {
        name: "screen_dump",
        command: CMD_SCREEN_DUMP,
        policy: SendPolicy::BestEffort,
    },
    Step {
        name: "transfer_file",
        command: CMD_TRANSFER_FILE,
        policy: SendPolicy::Required,
    },
];

/// Run the capture sequence on `transport` and return the PNG image.
///
/// `timeout` applies to every send and to the receive.
///
/// # Errors
///
/// - [`Error::Send`] if the transfer request cannot be sent.
/// - [`Error::Receive`] if the transfer response cannot be read.
/// - [`Error::ResponseTooLarge`] if the response exceeds
///   [`IMAGE_SIZE_MAX`].
/// - [`Error::MalformedResponse`] if the response framing is invalid.
pub async fn capture_image(transport: &mut dyn Transport, timeout: Duration) -> Result<Vec<u8>> {
    for step in &CAPTURE_SEQUENCE {
        debug!(step = step.name, command = step.command, "Sending command");
        match (transport.send(step.command.as_bytes(), timeout).await, step.policy) {
            (Ok(()), _) => {}
            (Err(e), SendPolicy::BestEffort) => {
                warn!(step = step.name, error = %e, "Command not sent (continuing anyway)");
            }
            (Err(e), SendPolicy::Required) => {
                return Err(Error::Send(format!("{}: {e}", step.name)));
            }
        }
    }

    // One byte of headroom tells a response of exactly IMAGE_SIZE_MAX
    // apart from a longer one.
    let mut response = vec![0u8; IMAGE_SIZE_MAX + 1];
    let length = transport
        .receive(&mut response, timeout)
        .await
        .map_err(|e| match e {
            Error::ResponseTooLarge { .. } => Error::ResponseTooLarge {
                limit: IMAGE_SIZE_MAX,
            },
            other => Error::Receive(other.to_string()),
        })?;
    if length > IMAGE_SIZE_MAX {
        return Err(Error::ResponseTooLarge {
            limit: IMAGE_SIZE_MAX,
        });
    }
    debug!(bytes = length, "Received transfer response");

    let block = protocol::parse_block_response(&response[..length])?;
    if let Some(declared) = block.declared_len {
        if declared != block.payload.len() {
            debug!(
                declared,
                actual = block.payload.len(),
                "Block header length differs from payload length"
            );
        }
    }

    // Trim the receive buffer down to the payload in place.
    response.truncate(block.payload.end);
    response.drain(..block.payload.start);
    Ok(response)
}
