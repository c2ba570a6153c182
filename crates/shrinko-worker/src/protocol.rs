//! Line-delimited JSON front end for [`BridgeHandle`].
//!
//! Each input line is one request object carrying an `id`, an `op` naming
//! the operation and that operation's fields in camelCase. Each reply is one
//! line `{"id", "result"}` or `{"id", "error"}`. Byte payloads travel as hex
//! strings.
//!
//! `getProgress` is answered as soon as it is read. Everything else is
//! handed to the worker in input order, so replies to those come back in
//! input order too.

use std::io;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use shrinko_runtime::{Encoding, FileData, VirtualFile};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::api::{BridgeHandle, CommandOutcome, RunRequest};
use crate::error::WorkerError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireFile {
    pub path: String,
    #[serde(deserialize_with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl From<WireFile> for VirtualFile {
    fn from(file: WireFile) -> Self {
        VirtualFile::new(file.path, file.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Call {
    LoadInputFiles {
        files: Vec<WireFile>,
        main: String,
        #[serde(default)]
        subfile: Option<String>,
    },
    ListInputFile {
        files: Vec<WireFile>,
        main: String,
    },
    UpdateInputFile {
        text: String,
    },
    UpdateScriptFile {
        text: String,
    },
    UpdatePico8Dat {
        #[serde(deserialize_with = "hex_bytes")]
        data: Vec<u8>,
    },
    GetProgress,
    GetVersion,
    RunShrinko {
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        arg_string: Option<String>,
        #[serde(default)]
        use_script: bool,
        #[serde(default)]
        encoding: Option<String>,
        #[serde(default)]
        use_preview: bool,
    },
    RunTests,
}

fn hex_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(deserializer)?;
    hex::decode(text).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    fn new(id: Value, result: Result<Value, WorkerError>) -> Self {
        match result {
            Ok(value) => Self {
                id,
                result: Some(value),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Split a request line into its id and call. A line that is valid JSON but
/// not a valid call still yields its id so the error can be addressed.
pub fn parse(line: &str) -> Result<(Value, Call), (Value, WorkerError)> {
    let mut value: Value = serde_json::from_str(line)
        .map_err(|e| (Value::Null, WorkerError::Protocol(e.to_string())))?;
    let id = value
        .as_object_mut()
        .and_then(|object| object.remove("id"))
        .unwrap_or(Value::Null);
    match serde_json::from_value(value) {
        Ok(call) => Ok((id, call)),
        Err(e) => Err((id, WorkerError::Protocol(e.to_string()))),
    }
}

/// Perform one call against the bridge and render its result as JSON.
pub async fn execute(handle: &BridgeHandle, call: Call) -> Result<Value, WorkerError> {
    match call {
        Call::LoadInputFiles {
            files,
            main,
            subfile,
        } => {
            let files = files.into_iter().map(VirtualFile::from).collect();
            Ok(Value::String(
                handle.load_input_files(files, main, subfile).await?,
            ))
        }
        Call::ListInputFile { files, main } => {
            let files = files.into_iter().map(VirtualFile::from).collect();
            Ok(json!(handle.list_input_file(files, main).await?))
        }
        Call::UpdateInputFile { text } => {
            handle.update_input_file(text).await?;
            Ok(Value::Null)
        }
        Call::UpdateScriptFile { text } => {
            handle.update_script_file(text).await?;
            Ok(Value::Null)
        }
        Call::UpdatePico8Dat { data } => {
            handle.update_pico8_dat(data).await?;
            Ok(Value::Null)
        }
        Call::GetProgress => Ok(json!(handle.get_progress())),
        Call::GetVersion => Ok(Value::String(handle.get_version().await?)),
        Call::RunShrinko {
            args,
            arg_string,
            use_script,
            encoding,
            use_preview,
        } => {
            let encoding = encoding
                .as_deref()
                .map(str::parse::<Encoding>)
                .transpose()?;
            let outcome = handle
                .run_shrinko(RunRequest {
                    args,
                    arg_string,
                    use_script,
                    encoding,
                    use_preview,
                })
                .await?;
            Ok(outcome_json(outcome))
        }
        Call::RunTests => Ok(Value::String(handle.run_tests().await?)),
    }
}

fn outcome_json(outcome: CommandOutcome) -> Value {
    let output = outcome.output.map(|data| match data {
        FileData::Bytes(bytes) => Value::String(hex::encode(bytes)),
        FileData::Text(text) => Value::String(text),
    });
    json!({
        "exitCode": outcome.exit_code,
        "stdout": outcome.stdout,
        "output": output,
        "preview": outcome.preview,
    })
}

/// Serve requests read from `input` until it closes, writing replies to
/// `output`. Returns once every accepted request has been answered.
pub async fn serve<R, W>(handle: BridgeHandle, input: R, output: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(reply) = reply_rx.recv().await {
            let mut line = serde_json::to_vec(&reply)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        Ok::<_, io::Error>(())
    });

    let (call_tx, mut call_rx) = mpsc::unbounded_channel::<(Value, Call)>();
    let forwarder = {
        let handle = handle.clone();
        let replies = reply_tx.clone();
        tokio::spawn(async move {
            while let Some((id, call)) = call_rx.recv().await {
                let reply = Reply::new(id, execute(&handle, call).await);
                if replies.send(reply).is_err() {
                    break;
                }
            }
        })
    };

    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse(&line) {
            Ok((id, Call::GetProgress)) => {
                let _ = reply_tx.send(Reply::new(id, Ok(json!(handle.get_progress()))));
            }
            Ok((id, call)) => {
                tracing::debug!(%id, "Request queued");
                let _ = call_tx.send((id, call));
            }
            Err((id, e)) => {
                tracing::warn!(%id, error = %e, "Rejected request");
                let _ = reply_tx.send(Reply::new(id, Err(e)));
            }
        }
    }

    drop(call_tx);
    forwarder.await.map_err(io::Error::other)?;
    drop(reply_tx);
    writer.await.map_err(io::Error::other)?
}
