pub const FORMAT_VTT: &str = "vtt";
pub const FORMAT_TEXT: &str = "text";

/// Strips a WebVTT document down to its spoken lines, turning `<v Name>`
/// voice tags into `Name: ` prefixes.
pub fn vtt_to_text(vtt: &str) -> String {
    let mut lines = Vec::new();
    let mut in_note = false;

    for raw in vtt.lines() {
        let line = raw.trim();
        if line.is_empty() {
            in_note = false;
            continue;
        }
        if in_note || line.starts_with("NOTE") {
            in_note = true;
            continue;
        }
        if line.starts_with("WEBVTT") || line.contains("-->") || is_cue_number(line) {
            continue;
        }
        lines.push(strip_voice_tag(line));
    }

    lines.join("\n")
}

fn is_cue_number(line: &str) -> bool {
    line.chars().all(|c| c.is_ascii_digit())
}

fn strip_voice_tag(line: &str) -> String {
    let Some(rest) = line.strip_prefix("<v ") else {
        return line.to_string();
    };
    match rest.split_once('>') {
        Some((speaker, text)) => {
            let text = text.trim_end_matches("</v>").trim();
            format!("{}: {}", speaker.trim(), text)
        }
        None => line.to_string(),
    }
}

pub fn plain_text(content: &str, format: &str) -> String {
    if format == FORMAT_VTT {
        vtt_to_text(content)
    } else {
        content.to_string()
    }
}

pub fn word_count(text: &str) -> i32 {
    i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZOOM_VTT: &str = "WEBVTT\n\n1\n00:00:00.000 --> 00:00:04.000\nAlice Chen: Thanks for joining today.\n\n2\n00:00:04.500 --> 00:00:07.000\nBob Ruiz: Happy to be here.\n";

    #[test]
    fn strips_headers_cues_and_timings() {
        assert_eq!(
            vtt_to_text(ZOOM_VTT),
            "Alice Chen: Thanks for joining today.\nBob Ruiz: Happy to be here."
        );
    }

    #[test]
    fn converts_teams_voice_tags() {
        let vtt = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\n<v Dana Lee>Let's review the proposal.</v>\n";
        assert_eq!(vtt_to_text(vtt), "Dana Lee: Let's review the proposal.");
    }

    #[test]
    fn skips_note_blocks() {
        let vtt = "WEBVTT\n\nNOTE\nrecorded by zoom\n\n00:00:00.000 --> 00:00:01.000\nHello\n";
        assert_eq!(vtt_to_text(vtt), "Hello");
    }

    #[test]
    fn counts_words_in_plain_text() {
        let text = plain_text(ZOOM_VTT, FORMAT_VTT);
        assert_eq!(word_count(&text), 12);
        assert_eq!(word_count(""), 0);
    }
}
