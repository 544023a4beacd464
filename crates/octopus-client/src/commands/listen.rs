//! The `listen` command: print inbound traffic as JSON lines.

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::commands::messaging::render;
use crate::error::{ClientError, ClientResult};
use crate::event::{ClientEvent, ClientEvents, IncomingRequest};
use crate::stream::Received;

/// Runs until Ctrl-C or until the client goes away.
///
/// With `echo` set, requests are answered with their own payload (streams
/// with their byte count); otherwise they are answered with an error.
pub async fn run(mut events: ClientEvents, echo: bool) -> ClientResult<()> {
    let (lines, mut output) = mpsc::unbounded_channel::<Value>();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle(event, echo, &lines),
                None => break,
            },
            Some(line) = output.recv() => println!("{}", line),
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }
    while let Ok(line) = output.try_recv() {
        println!("{}", line);
    }
    Ok(())
}

/// Turns one event into output, spawning work for events that must be
/// drained or answered.
fn handle(event: ClientEvent, echo: bool, lines: &mpsc::UnboundedSender<Value>) {
    match event {
        ClientEvent::Request(request) => {
            let lines = lines.clone();
            tokio::spawn(async move {
                let line = answer(request, echo).await;
                let _ = lines.send(line);
            });
        }
        ClientEvent::Stream(stream) => {
            let lines = lines.clone();
            tokio::spawn(async move {
                let line = match render(Received::Stream(stream)).await {
                    Ok(data) => json!({"event": "stream", "data": data}),
                    Err(e) => error_line(&e),
                };
                let _ = lines.send(line);
            });
        }
        other => {
            let _ = lines.send(describe(&other));
        }
    }
}

/// JSON line for events that need no further work.
fn describe(event: &ClientEvent) -> Value {
    match event {
        ClientEvent::Open => json!({"event": "open"}),
        ClientEvent::Close => json!({"event": "close"}),
        ClientEvent::State(state) => json!({"event": "state", "state": state.as_str()}),
        ClientEvent::Error(e) => error_line(e),
        ClientEvent::Message(data) => json!({"event": "message", "data": data}),
        ClientEvent::Request(request) => {
            json!({"event": "request", "messageId": request.responder.reply_to().to_string()})
        }
        ClientEvent::Stream(stream) => json!({"event": "stream", "uuid": stream.uuid()}),
    }
}

fn error_line(error: &ClientError) -> Value {
    json!({
        "event": "error",
        "code": error.code().map(|code| code.as_str()),
        "message": error.to_string(),
    })
}

async fn answer(request: IncomingRequest, echo: bool) -> Value {
    let IncomingRequest { data, responder } = request;
    let message_id = responder.reply_to().to_string();

    let data = match render(data).await {
        Ok(data) => data,
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "failed to read request payload");
            let _ = responder.reply_error(e);
            return json!({"event": "error", "messageId": message_id, "message": "unreadable payload"});
        }
    };

    let outcome = if echo {
        responder.reply(data.clone()).await
    } else {
        responder.reply_error("not accepting requests")
    };
    if let Err(e) = outcome {
        warn!(message_id = %message_id, error = %e, "failed to answer request");
    }

    json!({
        "event": "request",
        "messageId": message_id,
        "data": data,
        "answered": echo,
    })
}
