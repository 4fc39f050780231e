use crate::models::api::Citation;
use crate::services::retrieval_service::SearchResult;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One question sent over `/ws/query`. Questions on a socket run strictly in
/// sequence, never interleaved.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientQuery {
    pub question: String,
    #[serde(default = "default_true")]
    pub humanize: bool,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileScore {
    pub filename: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImmediateData {
    pub files: Vec<FileScore>,
    pub excerpts: Vec<String>,
}

/// Server → client frames, tagged by `type`. Ordering per question:
/// `status*`, `immediate`, then one of (`stream_start stream_token* stream_end`)
/// | `overview` | `chunks`; `error` is terminal.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        message: String,
    },
    Immediate {
        data: ImmediateData,
    },
    StreamStart,
    StreamToken {
        token: String,
    },
    StreamEnd {
        citations: Vec<Citation>,
    },
    Overview {
        data: String,
        citations: Vec<Citation>,
    },
    Chunks {
        data: Vec<SearchResult>,
    },
    Error {
        message: String,
        kind: String,
    },
}

impl ServerFrame {
    pub fn immediate_from(results: &[SearchResult]) -> Self {
        ServerFrame::Immediate {
            data: ImmediateData {
                files: results
                    .iter()
                    .map(|r| FileScore {
                        filename: r.filename.clone(),
                        score: r.fused_score,
                    })
                    .collect(),
                excerpts: results.iter().map(|r| r.text_excerpt.clone()).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_query_defaults() {
        let q: ClientQuery = serde_json::from_str(r#"{"question":"compare X and Y"}"#).unwrap();
        assert!(q.humanize);
        assert!(q.stream);
        assert!(q.session_id.is_none());
    }

    #[test]
    fn frames_carry_type_tags() {
        let json = serde_json::to_value(ServerFrame::StreamStart).unwrap();
        assert_eq!(json["type"], "stream_start");

        let json = serde_json::to_value(ServerFrame::StreamToken {
            token: "Hi".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "stream_token");
        assert_eq!(json["token"], "Hi");

        let json = serde_json::to_value(ServerFrame::Error {
            message: "boom".to_string(),
            kind: "LLMUnavailable".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "LLMUnavailable");
    }

    #[test]
    fn immediate_frame_shape() {
        let json = serde_json::to_value(ServerFrame::Immediate {
            data: ImmediateData {
                files: vec![FileScore {
                    filename: "a.txt".to_string(),
                    score: 0.8,
                }],
                excerpts: vec!["«a» excerpt".to_string()],
            },
        })
        .unwrap();
        assert_eq!(json["type"], "immediate");
        assert_eq!(json["data"]["files"][0]["filename"], "a.txt");
    }
}
