use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use tracing::{info, warn};

use crate::use_cases::{EntryUseCase, NumberUseCase, ReconcileUseCase};
use dan_engine::DanError;

#[derive(Debug, serde::Deserialize)]
struct JsonRpcRequest {
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
struct Tool {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

pub struct MCPHandler {
    entry_use_case: Arc<EntryUseCase>,
    reconcile_use_case: Arc<ReconcileUseCase>,
    number_use_case: Arc<NumberUseCase>,
}

impl MCPHandler {
    pub fn new(
        entry_use_case: Arc<EntryUseCase>,
        reconcile_use_case: Arc<ReconcileUseCase>,
        number_use_case: Arc<NumberUseCase>,
    ) -> Self {
        Self {
            entry_use_case,
            reconcile_use_case,
            number_use_case,
        }
    }

    pub async fn serve<R, W>(self, reader: R, mut writer: W) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(req) => req,
                Err(e) => {
                    warn!("Failed to parse request: {} - Line: {}", e, line);
                    let error_response = JsonRpcResponse {
                        jsonrpc: "2.0".to_string(),
                        result: None,
                        error: Some(JsonRpcError {
                            code: -32700,
                            message: "Parse error".to_string(),
                            data: Some(json!(e.to_string())),
                        }),
                        id: None,
                    };
                    let response_json = serde_json::to_string(&error_response)?;
                    writeln!(writer, "{}", response_json)?;
                    writer.flush()?;
                    continue;
                }
            };

            // Notifications get no response.
            let is_notification = request.id.is_none() || request.method.starts_with("notifications/");

            if is_notification {
                if request.method == "notifications/initialized" {
                    info!("client initialized");
                }
                continue;
            }

            let response = self.handle_request(request).await;
            let response_json = serde_json::to_string(&response)?;
            writeln!(writer, "{}", response_json)?;
            writer.flush()?;
        }

        Ok(())
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id).await,
            "tools/list" => self.handle_list_tools(request.id).await,
            "tools/call" => self.handle_call_tool(request.params, request.id).await,
            _ => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: None,
                error: Some(JsonRpcError {
                    code: -32601,
                    message: format!("Method not found: {}", request.method),
                    data: None,
                }),
                id: Some(request.id.unwrap_or(json!(1))),
            },
        }
    }

    async fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("initializing dàn MCP server");
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "dan-mcp-server",
                    "version": "0.1.0"
                }
            })),
            error: None,
            id: Some(id.unwrap_or(json!(1))),
        }
    }

    async fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools = self.get_tools();
        JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(json!({ "tools": tools })),
            error: None,
            id: Some(id.unwrap_or(json!(1))),
        }
    }

    async fn handle_call_tool(&self, params: Option<Value>, id: Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(p) => p,
            None => {
                return JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32602,
                        message: "Missing params".to_string(),
                        data: None,
                    }),
                    id: Some(id.unwrap_or(json!(1))),
                };
            }
        };

        let tool_name = match params.get("name").and_then(|n| n.as_str()) {
            Some(name) => name,
            None => {
                return JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: None,
                    error: Some(JsonRpcError {
                        code: -32602,
                        message: "Missing tool name".to_string(),
                        data: None,
                    }),
                    id: Some(id.unwrap_or(json!(1))),
                };
            }
        };

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        let arguments_map: HashMap<String, Value> = serde_json::from_value(arguments).unwrap_or_default();

        let result = self.execute_tool(tool_name, &arguments_map).await;

        match result {
            Ok(content) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(json!({
                    "content": [
                        {
                            "type": "text",
                            "text": content
                        }
                    ]
                })),
                error: None,
                id: Some(id.unwrap_or(json!(1))),
            },
            Err(e) => {
                warn!("tool {} failed: {}", tool_name, e);
                // Engine errors carry their kind.
                let data = e
                    .downcast_ref::<DanError>()
                    .map(|err| json!({ "kind": err.kind(), "retryable": err.is_retryable() }));
                let code = match e.downcast_ref::<DanError>() {
                    Some(DanError::InvalidRequest(_)) | Some(DanError::Validation(_)) => -32602,
                    _ => -32603,
                };
                JsonRpcResponse {
                    jsonrpc: "2.0".to_string(),
                    result: None,
                    error: Some(JsonRpcError {
                        code,
                        message: format!("Tool execution error: {}", e),
                        data,
                    }),
                    id: Some(id.unwrap_or(json!(1))),
                }
            }
        }
    }

    async fn execute_tool(&self, tool_name: &str, arguments: &HashMap<String, Value>) -> Result<String> {
        match tool_name {
            "submit_entry" => self.entry_use_case.submit_entry(arguments).await,
            "get_entry" => self.entry_use_case.get_entry(arguments).await,
            "list_entries" => self.entry_use_case.list_entries(arguments).await,
            "list_owners" => self.entry_use_case.list_owners(arguments).await,
            "run_reconciliation" => self.reconcile_use_case.run_reconciliation(arguments).await,
            "generate_numbers" => self.number_use_case.generate_numbers(arguments).await,
            "classify_number" => self.number_use_case.classify_number(arguments).await,
            "filter_numbers" => self.number_use_case.filter_numbers(arguments).await,
            _ => Err(anyhow::anyhow!("Unknown tool: {}", tool_name)),
        }
    }

    fn get_tools(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "submit_entry".to_string(),
                description: "Parse a dàn and store it for an owner and day, replacing that day's previous dàn".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "owner_name": {
                            "type": "string",
                            "description": "Name of the person submitting"
                        },
                        "raw_text": {
                            "type": "string",
                            "description": "Labels and numbers, e.g. \"3X 101 202 303\""
                        },
                        "day": {
                            "type": "string",
                            "description": "Day in YYYY-MM-DD format (default: today)"
                        },
                        "width": {
                            "type": "integer",
                            "description": "Digits per number: 2, 3 or 4"
                        }
                    },
                    "required": ["owner_name", "raw_text"]
                }),
            },
            Tool {
                name: "get_entry".to_string(),
                description: "Reload the stored dàn of an owner for a day".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "owner_name": {
                            "type": "string",
                            "description": "Name of the owner"
                        },
                        "day": {
                            "type": "string",
                            "description": "Day in YYYY-MM-DD format (default: today)"
                        }
                    },
                    "required": ["owner_name"]
                }),
            },
            Tool {
                name: "list_entries".to_string(),
                description: "List stored dàn, optionally filtered by day and owner".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "day": {
                            "type": "string",
                            "description": "Day in YYYY-MM-DD format"
                        },
                        "owner_name": {
                            "type": "string",
                            "description": "Only this owner's entries"
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Page size (default: 50)"
                        },
                        "offset": {
                            "type": "integer",
                            "description": "Entries to skip (default: 0)"
                        }
                    }
                }),
            },
            Tool {
                name: "list_owners".to_string(),
                description: "List everyone who ever submitted a dàn".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {}
                }),
            },
            Tool {
                name: "run_reconciliation".to_string(),
                description: "Compare pending dàn with posted draw results and record hits and misses".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "day": {
                            "type": "string",
                            "description": "Day in YYYY-MM-DD format (default: every day with pending entries)"
                        }
                    }
                }),
            },
            Tool {
                name: "generate_numbers".to_string(),
                description: "Draw distinct random numbers of a given width".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "count": {
                            "type": "integer",
                            "description": "How many numbers, at most 10^width"
                        },
                        "width": {
                            "type": "integer",
                            "description": "Digits per number: 2, 3 or 4"
                        },
                        "seed": {
                            "type": "integer",
                            "description": "Seed for a reproducible sequence"
                        }
                    },
                    "required": ["count"]
                }),
            },
            Tool {
                name: "classify_number".to_string(),
                description: "List the head, tail, touch, pair and sum tags of a number".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "number": {
                            "type": "string",
                            "description": "Zero-padded number, e.g. \"07\""
                        },
                        "width": {
                            "type": "integer",
                            "description": "Digits per number: 2, 3 or 4"
                        }
                    },
                    "required": ["number"]
                }),
            },
            Tool {
                name: "filter_numbers".to_string(),
                description: "Numbers of the universe matching every criteria group (any tag within a group)".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "criteria": {
                            "type": "array",
                            "description": "Groups of tags such as [[\"head:even\"], [\"touch:5\", \"touch:7\"]]",
                            "items": {
                                "type": "array",
                                "items": {"type": "string"}
                            }
                        },
                        "width": {
                            "type": "integer",
                            "description": "Digits per number: 2, 3 or 4"
                        }
                    }
                }),
            },
        ]
    }
}

pub fn stdio() -> (BufReader<io::Stdin>, io::Stdout) {
    (BufReader::new(io::stdin()), io::stdout())
}
