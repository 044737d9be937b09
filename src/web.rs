use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

use crate::controller::{ChatController, ChatUi, IndicatorHandle, Role, TurnHandle};
use crate::error::ChatError;
use crate::providers::Backend;
use crate::transport::Transports;

/// The conversation shared by every connection. Holding the lock is what
/// makes a cycle exclusive.
pub type SharedController = Arc<Mutex<ChatController<SseUi, Transports>>>;

pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Ethics Chat</title>
<style>
:root{--bg:#fafafa;--fg:#171717;--muted:#525252;--card:#fff;--border:#e5e5e5;--accent:#2563eb}
html.dark{--bg:#0a0a0a;--fg:#fafafa;--muted:#d4d4d4;--card:#171717;--border:#262626;--accent:#60a5fa}
*{box-sizing:border-box}
body{margin:0;font-family:system-ui,sans-serif;background:var(--bg);color:var(--fg)}
main{max-width:720px;margin:0 auto;padding:1rem;display:flex;flex-direction:column;height:100vh}
header{display:flex;gap:.5rem;align-items:center;justify-content:space-between;margin-bottom:.75rem}
#messages{flex:1;overflow-y:auto;border:1px solid var(--border);border-radius:.5rem;background:var(--card);padding:1rem}
.msg{display:flex;margin:.5rem 0}
.msg.user{justify-content:flex-end;text-align:right}
.msg .body{max-width:80%}
.msg .who{font-size:.8rem;font-weight:700}
.msg .text{font-size:.9rem;color:var(--muted);white-space:pre-wrap;margin-top:.25rem}
.typing span{display:inline-block;width:6px;height:6px;margin-right:3px;border-radius:50%;background:var(--muted);animation:blink 1.2s infinite}
.typing span:nth-child(2){animation-delay:.2s}.typing span:nth-child(3){animation-delay:.4s}
@keyframes blink{0%,80%,100%{opacity:.2}40%{opacity:1}}
form{display:flex;gap:.5rem;margin-top:.75rem}
input,select,button{font:inherit;padding:.5rem .75rem;border:1px solid var(--border);border-radius:.375rem;background:var(--card);color:var(--fg)}
input{flex:1}
button[type=submit]{background:var(--accent);color:#fff;border:none}
button:disabled,input:disabled{opacity:.5}
.notice{margin:.5rem 0 0;font-size:.85rem;color:#dc2626}
</style>
</head>
<body>
<main>
<header>
  <select id="backend" title="Select your model">
    <option value="local">Local (your own model via Ollama)</option>
    <option value="remote" selected>Inference (Mistral via OpenRouter API)</option>
  </select>
  <span>
    <button id="resetBtn" type="button">Reset</button>
    <button id="themeBtn" type="button">Theme</button>
  </span>
</header>
<div id="messages"></div>
<form id="chatForm">
  <input id="messageInput" autocomplete="off" placeholder="Ask a moral question...">
  <button type="submit">Send</button>
</form>
<p id="notice" class="notice" hidden></p>
</main>
<script>
const $=s=>document.querySelector(s);
const messages=$('#messages'),input=$('#messageInput'),send=$('button[type=submit]');
const turns=[],indicators={};
const MAX_URL=60000;
let locked=false,backend='remote';

(()=>{
  try{
    const stored=localStorage.getItem('themeMode');
    if(stored?stored==='dark':matchMedia('(prefers-color-scheme: dark)').matches)document.documentElement.classList.add('dark');
  }catch(_){}
  $('#themeBtn').onclick=()=>{
    const dark=!document.documentElement.classList.contains('dark');
    document.documentElement.classList.toggle('dark',dark);
    try{localStorage.setItem('themeMode',dark?'dark':'light')}catch(_){}
  };
})();

function scroll(){messages.scrollTop=messages.scrollHeight}
function setEnabled(on){input.disabled=!on;send.disabled=!on;if(on)input.focus()}
function appendTurn(role,text){
  const row=document.createElement('div');row.className='msg '+role;
  const body=document.createElement('div');body.className='body';
  const who=document.createElement('p');who.className='who';who.textContent=role==='user'?'You:':'LLM:';
  const p=document.createElement('p');p.className='text';p.textContent=text||'';
  body.append(who,p);row.append(body);messages.append(row);turns.push(p);scroll();
}
function clearTurns(){messages.innerHTML='';turns.length=0}
function notify(text){const n=$('#notice');n.textContent=text||'';n.hidden=!text}
function render(snap){
  clearTurns();
  snap.turns.forEach(t=>appendTurn(t.role,t.text));
  backend=snap.backend;
  $('#backend').value=backend;
  locked=snap.state==='locked';
  setEnabled(!locked&&snap.phase==='idle');
}
function apply(ev){
  switch(ev.op){
    case 'append_turn':appendTurn(ev.role,ev.text);break;
    case 'update_turn_text':if(turns[ev.id])turns[ev.id].textContent=ev.text;break;
    case 'append_token':if(turns[ev.id]){turns[ev.id].textContent+=ev.token;scroll()}break;
    case 'show_indicator':{
      const w=document.createElement('div');w.className='msg';
      w.innerHTML='<div class="typing"><span></span><span></span><span></span></div>';
      messages.append(w);indicators[ev.id]=w;scroll();break;}
    case 'hide_indicator':if(indicators[ev.id]){indicators[ev.id].remove();delete indicators[ev.id]}break;
    case 'set_input_enabled':setEnabled(ev.enabled);break;
    case 'clear_all_turns':clearTurns();break;
    case 'rejected':if(ev.reason==='locked')setEnabled(false);break;
  }
}
async function loadState(){
  const r=await fetch('/state');
  if(r.ok){notify('');render(await r.json());return}
  notify('An answer is still streaming; retrying...');
  setTimeout(loadState,1000);
}
async function post(path){
  const r=await fetch(path,{method:'POST'});
  if(r.ok){notify('');render(await r.json());input.value='';return}
  $('#backend').value=backend;
  const err=await r.json().catch(()=>({}));
  notify(err.error||('Request failed: '+r.status));
}
$('#backend').onchange=e=>post('/select?backend='+encodeURIComponent(e.target.value));
$('#resetBtn').onclick=()=>post('/reset');
$('#chatForm').onsubmit=e=>{
  e.preventDefault();
  const msg=input.value.trim();
  if(!msg||locked)return;
  const url='/submit?message='+encodeURIComponent(msg);
  if(url.length>MAX_URL){notify('Message too long.');return}
  notify('');
  input.value='';
  let received=false;
  const es=new EventSource(url);
  es.onmessage=m=>{
    received=true;
    if(m.data==='[DONE]'){es.close();return}
    try{apply(JSON.parse(m.data))}catch(_){}
  };
  es.onerror=()=>{
    es.close();
    if(received)return;
    input.value=msg;
    notify('Message could not be sent.');
    loadState();
  };
};
loadState();
</script>
</body>
</html>"##;

// ---------------------------------------------------------------------------
// UI collaborator over server-sent events
// ---------------------------------------------------------------------------

/// One rendering instruction for the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UiEvent {
    AppendTurn { id: usize, role: Role, text: String },
    UpdateTurnText { id: usize, text: String },
    AppendToken { id: usize, token: String },
    ShowIndicator { id: usize },
    HideIndicator { id: usize },
    SetInputEnabled { enabled: bool },
    ClearAllTurns,
    /// The submission was refused before any turn was created.
    Rejected { reason: String },
}

/// [`ChatUi`] that forwards every call as a [`UiEvent`] to the connection
/// currently attached. Turn ids track the page's bubble order.
#[derive(Debug, Default)]
pub struct SseUi {
    tx: Option<mpsc::UnboundedSender<UiEvent>>,
    next_turn: usize,
    next_indicator: usize,
}

impl SseUi {
    pub fn attach(&mut self, tx: mpsc::UnboundedSender<UiEvent>) {
        self.tx = Some(tx);
    }

    pub fn detach(&mut self) {
        self.tx = None;
    }

    fn emit(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

impl ChatUi for SseUi {
    fn append_turn(&mut self, role: Role, initial_text: &str) -> TurnHandle {
        let id = self.next_turn;
        self.next_turn += 1;
        self.emit(UiEvent::AppendTurn { id, role, text: initial_text.to_string() });
        TurnHandle(id)
    }

    fn update_turn_text(&mut self, handle: TurnHandle, full_text: &str) {
        self.emit(UiEvent::UpdateTurnText { id: handle.0, text: full_text.to_string() });
    }

    fn append_token(&mut self, handle: TurnHandle, token: &str) {
        self.emit(UiEvent::AppendToken { id: handle.0, token: token.to_string() });
    }

    fn show_pending_indicator(&mut self) -> IndicatorHandle {
        let id = self.next_indicator;
        self.next_indicator += 1;
        self.emit(UiEvent::ShowIndicator { id });
        IndicatorHandle(id)
    }

    fn hide_pending_indicator(&mut self, handle: IndicatorHandle) {
        self.emit(UiEvent::HideIndicator { id: handle.0 });
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.emit(UiEvent::SetInputEnabled { enabled });
    }

    fn clear_all_turns(&mut self) {
        self.next_turn = 0;
        self.emit(UiEvent::ClearAllTurns);
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

/// Percent-decoding for URL query parameters. Multi-byte sequences are
/// reassembled before UTF-8 decoding.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("00");
                out.push(u8::from_str_radix(hex, 16).unwrap_or(0));
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

/// Largest request head accepted. The submitted message travels in the
/// query string, so this bounds the message size.
pub const MAX_REQUEST_HEAD: usize = 64 * 1024;

const READ_CHUNK: usize = 8192;

/// Result of parsing the bytes received so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestHead {
    Complete { method: String, target: String },
    /// Valid so far but the blank line ending the head has not arrived.
    Partial,
    Invalid,
}

/// Method and target of an HTTP/1.1 request head.
pub fn parse_request_head(buf: &[u8]) -> RequestHead {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => match (req.method, req.path) {
            (Some(method), Some(target)) => RequestHead::Complete {
                method: method.to_string(),
                target: target.to_string(),
            },
            _ => RequestHead::Invalid,
        },
        Ok(httparse::Status::Partial) => RequestHead::Partial,
        Err(_) => RequestHead::Invalid,
    }
}

enum HeadRead {
    Request { method: String, target: String },
    TooLarge,
    Invalid,
}

/// Read until the request head is complete, growing the buffer up to
/// [`MAX_REQUEST_HEAD`].
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<HeadRead> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(HeadRead::Invalid);
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_request_head(&buf) {
            RequestHead::Complete { method, target } => {
                return Ok(HeadRead::Request { method, target })
            }
            RequestHead::Invalid => return Ok(HeadRead::Invalid),
            RequestHead::Partial if buf.len() >= MAX_REQUEST_HEAD => {
                return Ok(HeadRead::TooLarge)
            }
            RequestHead::Partial => {}
        }
    }
}

/// Swallow whatever the client is still sending so closing the socket does
/// not reset the connection before the response is read.
async fn drain(stream: &mut TcpStream) {
    let _ = stream.shutdown().await;
    let mut sink = [0u8; READ_CHUNK];
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    })
    .await;
}

fn split_target(target: &str) -> (&str, &str) {
    match target.find('?') {
        Some(idx) => (&target[..idx], &target[idx + 1..]),
        None => (target, ""),
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await
}

async fn write_json<T: Serialize>(
    stream: &mut TcpStream,
    status: &str,
    value: &T,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let body = serde_json::to_string(value)?;
    write_response(stream, status, "application/json", &body).await?;
    Ok(())
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

/// Start the web UI server and optionally open the browser.
pub async fn serve(
    port: u16,
    controller: SharedController,
    open_browser: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    let url = format!("http://localhost:{}", port);
    info!(%url, "web UI listening");

    if open_browser {
        #[cfg(target_os = "windows")]
        {
            let _ = std::process::Command::new("cmd")
                .args(["/C", &format!("start {}", url)])
                .spawn();
        }
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(&url).spawn();
        }
        #[cfg(target_os = "linux")]
        {
            let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
        }
    }

    run(listener, controller).await
}

/// Accept loop over an already bound listener.
pub async fn run(
    listener: TcpListener,
    controller: SharedController,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, controller).await {
                error!(%addr, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    controller: SharedController,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (method, target) = match read_request_head(&mut stream).await? {
        HeadRead::Request { method, target } => (method, target),
        HeadRead::TooLarge => {
            debug!(limit = MAX_REQUEST_HEAD, "request head too large");
            write_json(&mut stream, "413 Payload Too Large", &error_body("message too long"))
                .await?;
            drain(&mut stream).await;
            return Ok(());
        }
        HeadRead::Invalid => {
            write_response(&mut stream, "400 Bad Request", "text/plain", "bad request").await?;
            return Ok(());
        }
    };
    let (path, query) = split_target(&target);
    let params = parse_query(query);
    debug!(%method, %path, "request");

    match (method.as_str(), path) {
        ("GET", "/") => {
            write_response(&mut stream, "200 OK", "text/html; charset=utf-8", INDEX_HTML).await?;
        }
        ("GET", "/state") => {
            let Ok(guard) = controller.try_lock() else {
                write_json(&mut stream, "409 Conflict", &error_body(&ChatError::Busy.to_string())).await?;
                return Ok(());
            };
            let snapshot = guard.session().snapshot();
            drop(guard);
            write_json(&mut stream, "200 OK", &snapshot).await?;
        }
        ("POST", "/select") => {
            let name = params.get("backend").map(String::as_str).unwrap_or("");
            let backend = match name.parse::<Backend>() {
                Ok(b) => b,
                Err(e) => {
                    write_json(&mut stream, "400 Bad Request", &error_body(&e.to_string())).await?;
                    return Ok(());
                }
            };
            let Ok(mut guard) = controller.try_lock() else {
                write_json(&mut stream, "409 Conflict", &error_body(&ChatError::Busy.to_string())).await?;
                return Ok(());
            };
            guard.select_backend(backend);
            let snapshot = guard.session().snapshot();
            drop(guard);
            write_json(&mut stream, "200 OK", &snapshot).await?;
        }
        ("POST", "/reset") => {
            let Ok(mut guard) = controller.try_lock() else {
                write_json(&mut stream, "409 Conflict", &error_body(&ChatError::Busy.to_string())).await?;
                return Ok(());
            };
            guard.reset_session();
            let snapshot = guard.session().snapshot();
            drop(guard);
            write_json(&mut stream, "200 OK", &snapshot).await?;
        }
        ("GET", "/submit") => {
            let message = params.get("message").cloned().unwrap_or_default();
            stream_submission(stream, controller, message).await?;
        }
        _ => {
            write_response(&mut stream, "404 Not Found", "text/plain", "not found").await?;
        }
    }
    Ok(())
}

/// Run one cycle and relay its UI events to the client as SSE.
async fn stream_submission(
    mut stream: TcpStream,
    controller: SharedController,
    message: String,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Ok(mut guard) = controller.try_lock_owned() else {
        write_json(&mut stream, "409 Conflict", &error_body(&ChatError::Busy.to_string())).await?;
        return Ok(());
    };

    let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\n\r\n";
    stream.write_all(headers.as_bytes()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<UiEvent>();
    guard.ui_mut().attach(tx);

    // The cycle owns the lock; it runs to completion even if the client leaves.
    let cycle = tokio::spawn(async move {
        let result = guard.submit(&message).await;
        guard.ui_mut().detach();
        result
    });

    let mut connected = true;
    while let Some(event) = rx.recv().await {
        if !connected {
            continue;
        }
        if let Ok(json) = serde_json::to_string(&event) {
            let sse = format!("data: {}\n\n", json);
            if stream.write_all(sse.as_bytes()).await.is_err() {
                connected = false;
            }
        }
    }

    let rejection = match cycle.await? {
        Ok(outcome) => {
            debug!(?outcome, "cycle finished");
            None
        }
        Err(ChatError::EmptyInput) => Some("empty"),
        Err(ChatError::SessionLocked) => Some("locked"),
        Err(e) => {
            error!(error = %e, "cycle aborted");
            Some("error")
        }
    };

    if connected {
        if let Some(reason) = rejection {
            let event = UiEvent::Rejected { reason: reason.to_string() };
            if let Ok(json) = serde_json::to_string(&event) {
                let _ = stream.write_all(format!("data: {}\n\n", json).as_bytes()).await;
            }
        }
        let _ = stream.write_all(b"data: [DONE]\n\n").await;
    }
    Ok(())
}
