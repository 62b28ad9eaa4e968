use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Output captured from one pipe, capped at a byte limit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub text: String,
    pub truncated: bool,
}

/// Drain `reader` to EOF, keeping at most `limit` bytes. The pipe is always
/// read to the end so the writer never blocks on a full pipe.
pub async fn capture<R>(mut reader: R, limit: usize) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::with_capacity(limit.min(8 * 1024));
    let mut chunk = [0u8; 8 * 1024];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Output pipe closed with error: {}", e);
                break;
            }
        }
    }

    Captured {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
    }
}
