use std::sync::Arc;

use gemini_live_types::{FunctionCall, FunctionResponse};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{RetryPolicy, execute};
use crate::error::LiveError;
use crate::events::{EventSink, Expression, HistoryItem, SessionEvent};
use crate::personality::PersonalityUpdate;
use crate::remote::{CodeRequest, Geolocator, RemoteTools};
use crate::tools::{LocalTool, RemoteTool, ToolKind, ToolName, string_arg};

pub const MAX_MEDIA_ID_LEN: usize = 32;

/// Outcome of one tool call, delivered to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReply {
    /// Answer to send back on the channel.
    Response {
        response: FunctionResponse,
        remote: bool,
    },
    /// The credential was rejected. The batch is abandoned and the session must end.
    Fatal { id: String, error: LiveError },
}

/// Routes tool calls to their handlers and answers every call exactly once.
///
/// Local handlers answer before [`dispatch`](Self::dispatch) returns. Remote
/// handlers run as tasks through the backoff executor and answer when they
/// settle, in any order.
pub struct ToolDispatcher {
    remote: Arc<dyn RemoteTools>,
    geolocator: Option<Arc<dyn Geolocator>>,
    policy: Arc<RetryPolicy>,
    events: EventSink,
    replies: mpsc::UnboundedSender<ToolReply>,
    cancel: CancellationToken,
}

impl ToolDispatcher {
    pub fn new(
        remote: Arc<dyn RemoteTools>,
        geolocator: Option<Arc<dyn Geolocator>>,
        policy: RetryPolicy,
        events: EventSink,
        replies: mpsc::UnboundedSender<ToolReply>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote,
            geolocator,
            policy: Arc::new(policy),
            events,
            replies,
            cancel,
        }
    }

    /// Dispatches one batch. Returns the number of remote handlers started.
    pub fn dispatch(&self, calls: Vec<FunctionCall>) -> usize {
        let batch = self.cancel.child_token();
        let mut remote = 0;
        for call in calls {
            debug!("Tool call {} ({})", call.name, call.id);
            match ToolName::from_wire(&call.name) {
                None => {
                    warn!("Unknown tool requested: {}", call.name);
                    let payload = json!({"error": format!("unknown tool {}", call.name)});
                    self.reply(respond(call.id, call.name, payload), false);
                }
                Some(tool) => match tool.kind() {
                    ToolKind::Remote(tool) => {
                        remote += 1;
                        let task = RemoteTask {
                            remote: self.remote.clone(),
                            geolocator: self.geolocator.clone(),
                            policy: self.policy.clone(),
                            events: self.events.clone(),
                            replies: self.replies.clone(),
                        };
                        tokio::spawn(task.run(tool, call, batch.clone()));
                    }
                    ToolKind::Local(tool) => {
                        let payload = self.run_local(tool, &call.args);
                        self.reply(respond(call.id, call.name, payload), false);
                    }
                },
            }
        }
        remote
    }

    fn reply(&self, response: FunctionResponse, remote: bool) {
        let _ = self.replies.send(ToolReply::Response { response, remote });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn run_local(&self, tool: LocalTool, args: &Value) -> Value {
        match tool {
            LocalTool::ChangeFace => {
                let requested = string_arg(args, "expression").and_then(Expression::parse_requested);
                match requested {
                    Some(expression) => {
                        self.emit(SessionEvent::ExpressionChanged(expression));
                        json!({"status": "ok", "expression": expression.as_str()})
                    }
                    None => {
                        warn!("Ignoring unknown expression: {}", args["expression"]);
                        json!({"status": "ignored"})
                    }
                }
            }
            LocalTool::RequestTextInput => {
                let prompt = string_arg(args, "prompt").unwrap_or("Please type your message");
                self.emit(SessionEvent::HistoryItem(HistoryItem::TextInput {
                    prompt: prompt.to_string(),
                }));
                json!({"status": "shown"})
            }
            LocalTool::RequestFileUpload => {
                let prompt = string_arg(args, "prompt").unwrap_or("Please share a file");
                self.emit(SessionEvent::HistoryItem(HistoryItem::FileUpload {
                    prompt: prompt.to_string(),
                }));
                json!({"status": "shown"})
            }
            LocalTool::RenderHtml => match string_arg(args, "html") {
                Some(html) => {
                    self.emit(SessionEvent::HistoryItem(HistoryItem::Html {
                        html: html.to_string(),
                    }));
                    json!({"status": "rendered"})
                }
                None => json!({"status": "ignored"}),
            },
            LocalTool::UpdatePersonality => {
                let update: PersonalityUpdate =
                    serde_json::from_value(args.clone()).unwrap_or_default();
                if update.is_empty() {
                    json!({"status": "ignored"})
                } else {
                    info!("Personality update requested");
                    self.emit(SessionEvent::PersonalityUpdateRequested(update));
                    json!({"status": "ok"})
                }
            }
            LocalTool::ExportKnowledge => {
                self.emit(SessionEvent::ExportKnowledgeRequested);
                json!({"status": "ok"})
            }
            LocalTool::ResetPersonality => {
                self.emit(SessionEvent::ResetPersonalityRequested);
                json!({"status": "ok"})
            }
        }
    }
}

fn respond(id: String, name: String, payload: Value) -> FunctionResponse {
    FunctionResponse {
        id,
        name,
        response: json!({ "result": payload }),
    }
}

/// Checks a media identifier: one token, non-empty, at most 32 characters.
pub fn validate_media_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() || id.len() > MAX_MEDIA_ID_LEN || id.chars().any(char::is_whitespace) {
        return None;
    }
    Some(id.to_string())
}

struct RemoteSuccess {
    payload: Value,
    item: HistoryItem,
}

struct RemoteTask {
    remote: Arc<dyn RemoteTools>,
    geolocator: Option<Arc<dyn Geolocator>>,
    policy: Arc<RetryPolicy>,
    events: EventSink,
    replies: mpsc::UnboundedSender<ToolReply>,
}

impl RemoteTask {
    async fn run(self, tool: RemoteTool, call: FunctionCall, batch: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = batch.cancelled() => {
                debug!("Dropping {} ({}): batch abandoned", call.name, call.id);
                return;
            }
            outcome = self.invoke(tool, &call.args) => outcome,
        };
        if batch.is_cancelled() {
            return;
        }

        match outcome {
            Ok(success) => {
                let _ = self.events.send(SessionEvent::HistoryItem(success.item));
                let response = respond(call.id, call.name, success.payload);
                let _ = self.replies.send(ToolReply::Response {
                    response,
                    remote: true,
                });
            }
            Err(error @ LiveError::InvalidCredential(_)) => {
                error!("{} rejected the credential: {}", call.name, error);
                batch.cancel();
                let _ = self.replies.send(ToolReply::Fatal { id: call.id, error });
            }
            Err(e) => {
                let action = ToolName::from(tool).action();
                error!("{} failed: {}", action, e);
                let _ = self
                    .events
                    .send(SessionEvent::ExpressionChanged(Expression::Sad));
                let _ = self.events.send(SessionEvent::Apology {
                    action: action.to_string(),
                });
                let payload = json!({"error": format!("{action} failed")});
                let _ = self.replies.send(ToolReply::Response {
                    response: respond(call.id, call.name, payload),
                    remote: true,
                });
            }
        }
    }

    async fn invoke(&self, tool: RemoteTool, args: &Value) -> Result<RemoteSuccess, LiveError> {
        let remote = &self.remote;
        let policy = self.policy.as_ref();
        match tool {
            RemoteTool::PerformSearch => {
                let query = required(args, "query")?;
                let found = execute(policy, || remote.web_search(query)).await?;
                Ok(RemoteSuccess {
                    payload: json!({"summary": found.summary}),
                    item: HistoryItem::Search {
                        summary: found.summary,
                        links: found.links,
                    },
                })
            }
            RemoteTool::PerformMapSearch => {
                let query = required(args, "query")?;
                let location = self.locate().await;
                let found = execute(policy, || remote.map_search(query, location)).await?;
                Ok(RemoteSuccess {
                    payload: json!({"summary": found.summary}),
                    item: HistoryItem::Search {
                        summary: found.summary,
                        links: found.links,
                    },
                })
            }
            RemoteTool::GenerateCode => {
                let request = CodeRequest {
                    request: required(args, "request")?.to_string(),
                    language: string_arg(args, "language").map(str::to_string),
                };
                let generated = execute(policy, || remote.generate_code(&request)).await?;
                Ok(RemoteSuccess {
                    payload: json!({"language": generated.language, "code": generated.code}),
                    item: HistoryItem::Code {
                        language: generated.language,
                        code: generated.code,
                    },
                })
            }
            RemoteTool::GenerateImage => {
                let prompt = required(args, "prompt")?;
                let image = execute(policy, || remote.generate_image(prompt)).await?;
                Ok(RemoteSuccess {
                    payload: json!({"status": "The image is now shown to the user."}),
                    item: HistoryItem::Image {
                        prompt: prompt.to_string(),
                        mime_type: image.mime_type,
                        data: image.data,
                    },
                })
            }
            RemoteTool::PlayYoutube => {
                let query = required(args, "query")?;
                let raw = execute(policy, || remote.find_media(query)).await?;
                let video_id = validate_media_id(&raw).ok_or_else(|| {
                    LiveError::ToolFailure(format!("unusable video id {raw:?}"))
                })?;
                Ok(RemoteSuccess {
                    payload: json!({"status": "playing", "videoId": video_id}),
                    item: HistoryItem::Youtube {
                        video_id,
                        query: query.to_string(),
                    },
                })
            }
        }
    }

    /// Best effort; a failed lookup degrades to an un-located search.
    async fn locate(&self) -> Option<gemini_live_types::generate::LatLng> {
        let geolocator = self.geolocator.as_ref()?;
        match geolocator.locate().await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!("Searching without a location: {}", e);
                None
            }
        }
    }
}

fn required<'a>(args: &'a Value, key: &str) -> Result<&'a str, LiveError> {
    string_arg(args, key).ok_or_else(|| LiveError::ToolFailure(format!("missing argument {key}")))
}
