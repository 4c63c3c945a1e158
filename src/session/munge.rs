//! SDP answer munging
//!
//! Two local adjustments are applied to every answer before it becomes the
//! local description:
//!
//! - H.264 fmtp lines get `sps-pps-idr-in-keyframe=1` so recovery after
//!   packet loss does not stall waiting for out-of-band parameter sets.
//! - Opus fmtp lines get `stereo=1` and `minptime=10`, except when the
//!   host negotiated multichannel opus, whose fmtp shape is different and
//!   must not be touched.
//!
//! Both passes replace an existing parameter value in place and otherwise
//! insert next to a well-known anchor parameter, so munging an already
//! munged SDP is a no-op.

/// Apply the local fmtp adjustments to an SDP answer
pub fn munge_answer(sdp: &str) -> String {
    let multiopus = sdp.contains("multiopus");

    let lines: Vec<String> = sdp
        .lines()
        .map(|line| {
            if !line.starts_with("a=fmtp:") {
                return line.to_string();
            }
            let mut out = line.to_string();
            if out.contains("packetization-mode=") {
                out = set_param(&out, "sps-pps-idr-in-keyframe", "1", "packetization-mode=");
            }
            if out.contains("useinbandfec=") && !multiopus {
                out = set_param(&out, "stereo", "1", "useinbandfec=");
                out = set_param(&out, "minptime", "10", "useinbandfec=");
            }
            out
        })
        .collect();

    // SDP lines are CRLF terminated
    let mut out = lines.join("\r\n");
    if sdp.ends_with('\n') {
        out.push_str("\r\n");
    }
    out
}

/// Set `name=value` in an fmtp line: replace the existing value if the
/// parameter is present, otherwise insert it just before `anchor`.
fn set_param(line: &str, name: &str, value: &str, anchor: &str) -> String {
    let needle = format!("{name}=");
    if let Some(at) = find_param(line, &needle) {
        let value_start = at + needle.len();
        let value_end = line[value_start..]
            .find(';')
            .map(|i| value_start + i)
            .unwrap_or(line.len());
        let mut out = String::with_capacity(line.len());
        out.push_str(&line[..value_start]);
        out.push_str(value);
        out.push_str(&line[value_end..]);
        return out;
    }

    match find_param(line, anchor) {
        Some(at) => {
            let mut out = String::with_capacity(line.len() + needle.len() + value.len() + 1);
            out.push_str(&line[..at]);
            out.push_str(&needle);
            out.push_str(value);
            out.push(';');
            out.push_str(&line[at..]);
            out
        }
        None => line.to_string(),
    }
}

/// Find a parameter at a `;`/space boundary so e.g. `stereo=` never
/// matches inside `sprop-stereo=`.
fn find_param(line: &str, needle: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = line[from..].find(needle) {
        let at = from + rel;
        if at == 0 || matches!(line.as_bytes()[at - 1], b';' | b' ') {
            return Some(at);
        }
        from = at + needle.len();
    }
    None
}
