//! Canonical hex+ASCII rendering of packet bytes, in the layout of
//! `hexdump -C`.

use std::fmt::Write;

/// Number of bytes rendered per line.
const BYTES_PER_LINE: usize = 16;

/// Renders `bytes` as lines of an 8 digit hex offset, sixteen hex bytes split
/// in two groups of eight, and the printable ASCII characters between `|`.
///
/// ```text
/// 00000000  45 00 00 54 12 34 40 00  40 01 00 00 0a 00 00 01  |E..T.4@.@.......|
/// ```
///
/// Non-printable bytes are shown as `.` in the ASCII column. Every line,
/// including the last, ends with a newline. An empty input renders as an
/// empty string.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(BYTES_PER_LINE) * 79);

    for (line, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:08x}  ", line * BYTES_PER_LINE);

        for i in 0..BYTES_PER_LINE {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, "{b:02x} ");
                }
                None => out.push_str("   "),
            }

            if i == BYTES_PER_LINE / 2 - 1 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }

    out
}
