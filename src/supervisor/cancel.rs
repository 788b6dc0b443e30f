//! Operator stop requests.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Operator token that requests an early stop.
pub const STOP_TOKEN: &str = "stop";

/// Whether a line of operator input asks to stop sampling.
pub fn is_stop_request(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(STOP_TOKEN)
}

/// Read operator input line by line and cancel `token` on a stop request.
///
/// Returns when a stop is seen, the input ends, the token is cancelled from
/// elsewhere, or reading fails. Ending without a stop leaves the token
/// untouched, so the supervisor keeps polling liveness only.
pub async fn listen_for_stop<R>(reader: R, token: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("stop listener finished, token already cancelled");
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if is_stop_request(&line) => {
                    info!("stop requested by operator");
                    token.cancel();
                    return;
                }
                Ok(Some(line)) => {
                    debug!(input = %line.trim(), "ignoring operator input");
                }
                Ok(None) => {
                    debug!("operator input closed");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "reading operator input failed");
                    return;
                }
            },
        }
    }
}
