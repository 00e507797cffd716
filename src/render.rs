//! Status box rendering for rebuild attempts.
//!
//! Pure functions from a request snapshot to its display payload. Sending is
//! the orchestrator's job; every update targets the same display key derived
//! from the request id, so transports with replace semantics update the box
//! in place. On append-only transports this degrades to a progress log.

use crate::rebuild::{RebuildRequest, Stage, StageStatus};

pub fn icon(status: StageStatus) -> &'static str {
    match status {
        StageStatus::NotStarted => "🔲",
        StageStatus::InProgress => "⏳",
        StageStatus::Complete => "✅",
    }
}

/// Display text for a stage. The wording tracks the status so the box reads
/// as a narrative, not just a checklist.
pub fn stage_text(stage: Stage, status: StageStatus) -> &'static str {
    match (stage, status) {
        (Stage::BuildClient, StageStatus::NotStarted) => "Build client",
        (Stage::BuildClient, StageStatus::InProgress) => "Building client...",
        (Stage::BuildClient, StageStatus::Complete) => {
            "Client built -- Please refresh to see changes"
        }
        (Stage::Hotpatch, StageStatus::NotStarted) => "Request hotpatches",
        (Stage::Hotpatch, StageStatus::InProgress) => {
            "Requesting hotpatches for data and chat plugins..."
        }
        (Stage::Hotpatch, StageStatus::Complete) => {
            "Hotpatches requested -- Please await notification that hotpatching has succeeded"
        }
    }
}

fn stage_html(stage: Stage, status: StageStatus) -> String {
    format!("<p>{} {}</p>", icon(status), stage_text(stage, status))
}

/// Render the whole attempt as a bordered box.
pub fn render(request: &RebuildRequest) -> String {
    let mut lines = Vec::new();
    lines.push("<div class=\"infobox\">".to_string());
    lines.push(format!(
        "<p><b><u>Hotpatch {} (<small>Requester: {}</small>)</u></b></p>",
        request.request_id, request.requester
    ));
    lines.push(stage_html(Stage::BuildClient, request.build_client));
    lines.push(stage_html(Stage::Hotpatch, request.hotpatch));
    lines.push("</div>".to_string());
    lines.join("")
}

/// The full protocol line for a status update, keyed by request id so
/// repeated sends overwrite rather than duplicate.
pub fn update_line(channel: &str, request: &RebuildRequest) -> String {
    format!(
        "{channel}|/adduhtml patch-{}, {}",
        request.request_id,
        render(request)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icons_cover_all_statuses() {
        assert_eq!(icon(StageStatus::NotStarted), "🔲");
        assert_eq!(icon(StageStatus::InProgress), "⏳");
        assert_eq!(icon(StageStatus::Complete), "✅");
    }

    #[test]
    fn renders_both_stages_with_header() {
        let mut request = RebuildRequest::new("bob-17", "bob");
        request.advance(Stage::BuildClient, StageStatus::InProgress);

        let html = render(&request);
        assert!(html.starts_with("<div class=\"infobox\">"));
        assert!(html.contains("Hotpatch bob-17"));
        assert!(html.contains("Requester: bob"));
        assert!(html.contains("⏳ Building client..."));
        assert!(html.contains("🔲 Request hotpatches"));
        assert!(html.ends_with("</div>"));
    }

    #[test]
    fn update_line_is_keyed_by_request_id() {
        let request = RebuildRequest::new("bob-17", "bob");
        let line = update_line("lobby", &request);
        assert!(line.starts_with("lobby|/adduhtml patch-bob-17, "));

        // The key is stable as stages advance.
        let mut later = request.clone();
        later.advance(Stage::Hotpatch, StageStatus::Complete);
        assert!(update_line("lobby", &later).starts_with("lobby|/adduhtml patch-bob-17, "));
    }
}
