//! Scatter/gather writes for the send path.
//!
//! A framed send is two parts, header and payload. Both go out through
//! `write_vectored` so the common case is one syscall; a partial write is
//! continued from where the kernel stopped until every byte is out.

use std::io::{self, IoSlice};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write all `parts` back to back, then flush.
///
/// Empty parts are skipped. A write returning 0 fails with `WriteZero`.
pub(crate) async fn write_all_vectored<W>(writer: &mut W, parts: &[&[u8]]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let total: usize = parts.iter().map(|p| p.len()).sum();
    if total == 0 {
        return writer.flush().await;
    }

    let slices = build_remaining_slices(parts, 0);
    let written = writer.write_vectored(&slices).await?;

    if written == total {
        writer.flush().await?;
        return Ok(());
    }

    if written == 0 {
        return Err(write_zero());
    }

    let mut total_written = written;

    while total_written < total {
        let remaining = build_remaining_slices(parts, total_written);
        if remaining.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining).await?;
        if written == 0 {
            return Err(write_zero());
        }

        total_written += written;
    }

    writer.flush().await
}

/// IoSlices for whatever is left after `skip_bytes` were written.
fn build_remaining_slices<'a>(parts: &[&'a [u8]], skip_bytes: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(parts.len());
    let mut skipped = 0;

    for part in parts {
        let part_start = skipped;
        let part_end = skipped + part.len();

        if !part.is_empty() && skip_bytes < part_end {
            let start_in_part = skip_bytes.saturating_sub(part_start);
            slices.push(IoSlice::new(&part[start_in_part..]));
        }
        skipped = part_end;
    }

    slices
}

fn write_zero() -> io::Error {
    io::Error::new(io::ErrorKind::WriteZero, "write_vectored returned 0")
}
