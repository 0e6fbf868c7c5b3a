//! LeCroy WavePro hardcopy commands and transfer-response framing.
//!
//! The screenshot is produced on the instrument's own disk by the
//! hardcopy subsystem and then read back with `TRFL?`. The commands are
//! fixed wire literals; the backslashes are single `\` bytes in Windows
//! paths on the instrument.
//!
//! # Transfer response format
//!
//! ```text
//! <echo:6> <n:1> <len:n> <payload...> <crc:8> <terminator:2>
//! ```
//!
//! - `echo`: six acknowledgment bytes echoing the query header.
//! - `n`: one ASCII digit, the number of length digits that follow
//!   (IEEE-488.2 definite-length block data).
//! - `len`: `n` ASCII digits giving the payload length.
//! - `crc`: eight-byte CRC footer appended by the instrument.
//! - `terminator`: two-byte line terminator.
//!
//! The payload is located purely by offsets: it starts at `7 + n` and ends
//! ten bytes before the end of the response. The `len` digits are reported
//! but not trusted.

use std::ops::Range;

use lxishot_core::error::{Error, Result};

/// Largest transfer response accepted (4 MiB).
pub const IMAGE_SIZE_MAX: usize = 0x40_0000;

/// Delete the previous screenshot so that the instrument's autoincrementing
/// filename suffix restarts at `00000`.
pub const CMD_DELETE_FILE: &str = r"DELETE_FILE DISK,HDD,FILE,'D:\HardCopy\lxi-screenshot--00000.png'";

/// Route hardcopy output to a full-screen PNG file in `D:\HardCopy`.
pub const CMD_HARDCOPY_SETUP: &str =
    r"hardcopy_setup DEV,png,DEST,FILE,DIR,'D:\HardCopy',AREA,FULLSCREEN,FILE,'lxi-screenshot'";

/// Trigger the screen dump.
pub const CMD_SCREEN_DUMP: &str = "scdp";

/// Request the transfer of the produced file.
pub const CMD_TRANSFER_FILE: &str = r"TRFL? DISK,HDD,FILE,'D:\HardCopy\lxi-screenshot--00000.png'";

/// Length of the acknowledgment echo before the block header.
pub const ECHO_LEN: usize = 6;
/// Length of the CRC footer.
pub const CRC_LEN: usize = 8;
/// Length of the line terminator after the CRC.
pub const TERMINATOR_LEN: usize = 2;
/// Bytes stripped from the end of every response.
pub const FOOTER_LEN: usize = CRC_LEN + TERMINATOR_LEN;
/// Shortest response that can hold an echo, a header digit, and a footer.
pub const MIN_RESPONSE_LEN: usize = ECHO_LEN + 1 + FOOTER_LEN;

/// The file extension of images produced by [`CMD_HARDCOPY_SETUP`].
pub const IMAGE_EXTENSION: &str = "png";

/// A parsed transfer response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    /// Number of length digits (`n` in the header).
    pub header_digits: usize,
    /// Payload length announced by the header digits, when they parse.
    pub declared_len: Option<usize>,
    /// Location of the image payload within the response.
    pub payload: Range<usize>,
}

impl BlockData {
    /// Borrow the payload out of the response it was parsed from.
    pub fn payload<'a>(&self, response: &'a [u8]) -> &'a [u8] {
        &response[self.payload.clone()]
    }
}

/// Locate the image payload in a `TRFL?` response.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] if the response is too short to
/// hold the echo, header digit, and footer, if the header digit is not an
/// ASCII digit, or if the length digits run into the footer.
///
/// # Example
///
/// ```
/// use lxishot_lecroy::protocol::parse_block_response;
///
/// let response = b"TRFL? 15PNGDATA12345678\r\n";
/// let block = parse_block_response(response).unwrap();
/// assert_eq!(block.payload(response), b"PNGDATA");
/// ```
pub fn parse_block_response(response: &[u8]) -> Result<BlockData> {
    if response.len() < MIN_RESPONSE_LEN {
        return Err(Error::MalformedResponse(format!(
            "response is {} bytes, need at least {}",
            response.len(),
            MIN_RESPONSE_LEN
        )));
    }

    let digit = response[ECHO_LEN];
    if !digit.is_ascii_digit() {
        return Err(Error::MalformedResponse(format!(
            "block header count {:?} is not a digit",
            char::from(digit)
        )));
    }
    let header_digits = usize::from(digit - b'0');

    let digits_start = ECHO_LEN + 1;
    let start = digits_start + header_digits;
    let end = response.len() - FOOTER_LEN;
    if start > end {
        return Err(Error::MalformedResponse(format!(
            "{header_digits} length digits overrun a {} byte response",
            response.len()
        )));
    }

    let declared_len = std::str::from_utf8(&response[digits_start..start])
        .ok()
        .and_then(|s| s.parse::<usize>().ok());

    Ok(BlockData {
        header_digits,
        declared_len,
        payload: start..end,
    })
}
