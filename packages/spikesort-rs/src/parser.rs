use crate::adapter::LabeledEvent;
use crate::error::ExecutionCause;

/// Parse a spike table written by an external backend.
///
/// One event per line as three whitespace separated integers:
/// `sample channel label`. Blank lines and lines starting with `#` are
/// skipped. The content is taken as bytes so it can come straight from a
/// memory map.
pub fn parse_spike_table(content: &[u8]) -> Result<Vec<LabeledEvent>, ExecutionCause> {
    let mut events = Vec::new();

    for (line_idx, line) in content.split(|&b| b == b'\n').enumerate() {
        let line = trim_ascii(line);
        if line.is_empty() || line[0] == b'#' {
            continue;
        }

        let mut fields = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|f| !f.is_empty());

        let mut next_int = |what: &str| -> Result<i64, ExecutionCause> {
            let field = fields.next().ok_or_else(|| {
                ExecutionCause::MalformedOutput(format!("line {}: missing {}", line_idx + 1, what))
            })?;
            std::str::from_utf8(field)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    ExecutionCause::MalformedOutput(format!(
                        "line {}: {} '{}' is not an integer",
                        line_idx + 1,
                        what,
                        String::from_utf8_lossy(field)
                    ))
                })
        };

        let sample = next_int("sample")?;
        let channel = next_int("channel")?;
        let label = next_int("label")?;

        let channel = usize::try_from(channel).map_err(|_| {
            ExecutionCause::MalformedOutput(format!(
                "line {}: negative channel {}",
                line_idx + 1,
                channel
            ))
        })?;

        events.push(LabeledEvent {
            channel,
            sample,
            label,
        });
    }

    log::debug!("Parsed {} spike events", events.len());
    Ok(events)
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}
