//! The counter demo served by `statewire serve`.

use serde_json::Value;
use statewire_engine::{CellStore, ContextGuard};
use statewire_server::{HandlerRegistry, HandlerResult, HandlerScope, PageRenderer};

const CLIENT_JS: &str = r#"
const root = document.body;
const sessionId = root.dataset.session;
const ws = new WebSocket(`ws://${location.host}${root.dataset.ws}`);
ws.onopen = () => ws.send(JSON.stringify({ type: "init", contextId: sessionId }));
ws.onmessage = (frame) => {
  const msg = JSON.parse(frame.data);
  if (msg.type === "domUpdate") {
    for (const p of msg.patches) {
      const el = document.getElementById(p.componentId);
      if (el) el.outerHTML = p.html;
    }
  } else if (msg.type === "error") {
    console.warn(msg.code, msg.message);
  }
};
root.addEventListener("click", (e) => {
  const handlerId = e.target.dataset && e.target.dataset.handler;
  if (!handlerId) return;
  ws.send(JSON.stringify({
    type: "event", handlerId, eventType: "click", contextId: sessionId,
    targetId: e.target.id || undefined,
    modifierKeys: { ctrl: e.ctrlKey, shift: e.shiftKey, alt: e.altKey, meta: e.metaKey },
  }));
});
"#;

fn count(cells: &CellStore) -> i64 {
    cells.get("count").and_then(Value::as_i64).unwrap_or(0)
}

fn render_counter(cells: &CellStore) -> String {
    format!("<output id=\"counter\">{}</output>", count(cells))
}

fn step(scope: &mut HandlerScope, delta: i64) -> HandlerResult {
    scope
        .require_context()?
        .update("count", |v| v.as_i64().unwrap_or(0).saturating_add(delta))?;
    Ok(())
}

/// Handlers for the counter buttons.
pub fn handlers() -> HandlerRegistry {
    let handlers = HandlerRegistry::new();
    handlers.register("increment", |_, scope| step(scope, 1));
    handlers.register("decrement", |_, scope| step(scope, -1));
    handlers.register("reset", |_, scope| {
        scope.require_context()?.set("count", 0)?;
        Ok(())
    });
    handlers
}

/// Renders the counter page and sets up its session.
pub struct CounterPage;

impl PageRenderer for CounterPage {
    fn render_page(&self, context: &mut ContextGuard, ws_path: &str) -> String {
        if !context.cells().contains("count") {
            // A fresh session never has the cell, so this cannot fail.
            let _ = context.create_named_cell("count", 0);
        }
        context.register_component("counter", render_counter);
        let counter = render_counter(context.cells());

        format!(
            "<!doctype html>\n<html>\n\
             <head><meta charset=\"utf-8\"><title>statewire counter</title></head>\n\
             <body data-session=\"{session}\" data-ws=\"{ws_path}\">\n\
             <button data-handler=\"decrement\">-</button>\n{counter}\n\
             <button data-handler=\"increment\">+</button>\n\
             <button data-handler=\"reset\">reset</button>\n\
             <script>{CLIENT_JS}</script>\n</body>\n</html>\n",
            session = context.session_id(),
        )
    }
}
