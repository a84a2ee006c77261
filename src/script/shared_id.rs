//! SharedId codec
//!
//! A stable DOM node reference: `f.<frameId>.d.<documentId>.e.<backendNodeId>`.
//! The legacy `<documentId>_element_<backendNodeId>` form still parses, with
//! no frame id. Malformed strings yield no match.

/// Parsed shared id components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedId {
    pub frame_id: Option<String>,
    pub document_id: String,
    pub backend_node_id: i64,
}

/// Format a shared id, with or without the frame component.
pub fn get_shared_id(
    frame_id: &str,
    document_id: &str,
    backend_node_id: i64,
    with_frame: bool,
) -> String {
    if with_frame {
        format!("f.{}.d.{}.e.{}", frame_id, document_id, backend_node_id)
    } else {
        format!("{}_element_{}", document_id, backend_node_id)
    }
}

/// Parse a shared id in either format.
pub fn parse_shared_id(value: &str) -> Option<SharedId> {
    if let Some(rest) = value.strip_prefix("f.") {
        let (frame_id, rest) = rest.split_once(".d.")?;
        let (document_id, backend) = rest.split_once(".e.")?;
        if frame_id.is_empty() || document_id.is_empty() {
            return None;
        }
        let backend_node_id = backend.parse::<i64>().ok()?;
        return Some(SharedId {
            frame_id: Some(frame_id.to_string()),
            document_id: document_id.to_string(),
            backend_node_id,
        });
    }

    let (document_id, backend) = value.split_once("_element_")?;
    if document_id.is_empty() {
        return None;
    }
    let backend_node_id = backend.parse::<i64>().ok()?;
    Some(SharedId {
        frame_id: None,
        document_id: document_id.to_string(),
        backend_node_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_frame_format() {
        let id = get_shared_id("FRAME", "DOC", 42, true);
        assert_eq!(id, "f.FRAME.d.DOC.e.42");
        let parsed = parse_shared_id(&id).unwrap();
        assert_eq!(parsed.frame_id.as_deref(), Some("FRAME"));
        assert_eq!(parsed.document_id, "DOC");
        assert_eq!(parsed.backend_node_id, 42);
    }

    #[test]
    fn round_trips_legacy_format() {
        let id = get_shared_id("FRAME", "DOC", 7, false);
        assert_eq!(id, "DOC_element_7");
        let parsed = parse_shared_id(&id).unwrap();
        assert_eq!(parsed.frame_id, None);
        assert_eq!(parsed.document_id, "DOC");
        assert_eq!(parsed.backend_node_id, 7);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_shared_id("garbage"), None);
        assert_eq!(parse_shared_id("f..d.DOC.e.1"), None);
        assert_eq!(parse_shared_id("f.FRAME.d.DOC.e.notanumber"), None);
        assert_eq!(parse_shared_id("DOC_element_"), None);
        assert_eq!(parse_shared_id("_element_3"), None);
    }
}
