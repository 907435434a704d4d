//! Response hardening for untrusted game content.

/// Same-origin only, except for the inline/eval script game bundlers emit.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
script-src 'self' 'unsafe-inline' 'unsafe-eval' blob:; \
style-src 'self' 'unsafe-inline'; \
img-src 'self' data: blob:; \
media-src 'self' data: blob:; \
font-src 'self' data:; \
connect-src 'self'; \
worker-src 'self' blob:; \
object-src 'none'; \
base-uri 'self'; \
form-action 'none'; \
frame-ancestors *";

/// Headers every response carries besides the CSP. The cross-origin
/// isolation pair lets games use `SharedArrayBuffer` for shared-memory input.
pub const EXTRA_HEADERS: [(&str, &str); 3] = [
    ("x-content-type-options", "nosniff"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-embedder-policy", "require-corp"),
];

/// Runs before any game script. Strips persistent storage and keeps raw
/// input events away from the game; input arrives over plugin channels.
pub const GUARD_SCRIPT: &str = r#"<script>(function () {
  "use strict";
  var blocked = /^(key|mouse|touch|pointer|click|dblclick|contextmenu|wheel)/;
  ["localStorage", "sessionStorage", "indexedDB", "caches"].forEach(function (name) {
    try { Object.defineProperty(window, name, { get: function () { return undefined; }, configurable: false }); } catch (e) {}
  });
  try {
    Object.defineProperty(document, "cookie", { get: function () { return ""; }, set: function () {}, configurable: false });
  } catch (e) {}
  [window, document].forEach(function (target) {
    var add = target.addEventListener;
    target.addEventListener = function (type, listener, options) {
      if (typeof type === "string" && blocked.test(type)) { return; }
      return add.call(this, type, listener, options);
    };
  });
})();</script>"#;

/// Insert the guard script as the first thing inside `<head>`, or at the
/// very start when the document has no head.
pub fn inject_guard(html: &str) -> String {
    let mut out = String::with_capacity(html.len() + GUARD_SCRIPT.len());
    match find_head_end(html) {
        Some(at) => {
            out.push_str(&html[..at]);
            out.push_str(GUARD_SCRIPT);
            out.push_str(&html[at..]);
        }
        None => {
            out.push_str(GUARD_SCRIPT);
            out.push_str(html);
        }
    }
    out
}

/// Byte offset just past the opening `<head ...>` tag.
fn find_head_end(html: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("<head") {
        let start = from + pos;
        let after = start + "<head".len();
        // Skip `<header>` and friends.
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return lower[after..].find('>').map(|end| after + end + 1);
            }
            _ => from = after,
        }
    }
    None
}
