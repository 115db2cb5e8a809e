//! Access-code gate in front of the session.

use std::io::Write;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncBufRead, Lines};
use tracing::{info, warn};

pub const MAX_ATTEMPTS: usize = 3;

pub fn code_matches(entered: &str, expected: &str) -> bool {
    bool::from(entered.as_bytes().ct_eq(expected.as_bytes()))
}

/// Ask for the access code until it matches, input ends, or attempts run out.
pub async fn unlock<R>(lines: &mut Lines<R>, expected: &str) -> anyhow::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    for attempt in 1..=MAX_ATTEMPTS {
        print!("Access Code: ");
        std::io::stdout().flush()?;
        let Some(entered) = lines.next_line().await? else {
            return Ok(false);
        };
        if code_matches(entered.trim(), expected) {
            info!("🔑 Access granted");
            return Ok(true);
        }
        warn!("Invalid access code (attempt {}/{})", attempt, MAX_ATTEMPTS);
        println!("😕 Invalid Code");
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[test]
    fn exact_match_only() {
        assert!(code_matches("nurse-2024", "nurse-2024"));
        assert!(!code_matches("nurse-202", "nurse-2024"));
        assert!(!code_matches("", "nurse-2024"));
    }

    #[tokio::test]
    async fn second_attempt_unlocks() {
        let input: &[u8] = b"wrong\n  open sesame \n";
        let mut lines = BufReader::new(input).lines();
        assert!(unlock(&mut lines, "open sesame").await.unwrap());
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_or_eof() {
        let input: &[u8] = b"a\nb\nc\nright\n";
        let mut lines = BufReader::new(input).lines();
        assert!(!unlock(&mut lines, "right").await.unwrap());

        let mut empty = BufReader::new(&b""[..]).lines();
        assert!(!unlock(&mut empty, "right").await.unwrap());
    }
}
