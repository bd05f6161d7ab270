//! Script shim injected into the webview before page scripts run
//!
//! Installs `window.__native__` with `invoke`, `onMessage`, `onEvent` and
//! `listen`. The shell provides the upward channel as
//! `window.__native__.post(text)` before injection, or exposes wry-style
//! `window.ipc.postMessage` / WebKit `messageHandlers.crossweb`.

const TIMEOUT_PLACEHOLDER: &str = "__CROSSWEB_TIMEOUT_MS__";

/// Shim source; [`render_bridge_script`] fills in the invocation deadline
pub const BRIDGE_SCRIPT_TEMPLATE: &str = r#"(function () {
  'use strict';
  var existing = window.__native__ || {};
  if (existing.__crossweb) { return; }

  var TIMEOUT_MS = __CROSSWEB_TIMEOUT_MS__;
  var pending = Object.create(null);
  var listeners = Object.create(null);

  function post(text) {
    if (typeof existing.post === 'function') { return existing.post(text); }
    if (window.ipc && typeof window.ipc.postMessage === 'function') { return window.ipc.postMessage(text); }
    if (window.webkit && window.webkit.messageHandlers && window.webkit.messageHandlers.crossweb) {
      return window.webkit.messageHandlers.crossweb.postMessage(text);
    }
    throw new Error('native bridge not available');
  }

  function newId() {
    if (window.crypto && typeof window.crypto.randomUUID === 'function') { return window.crypto.randomUUID(); }
    var b = new Uint8Array(16);
    window.crypto.getRandomValues(b);
    b[6] = (b[6] & 0x0f) | 0x40;
    b[8] = (b[8] & 0x3f) | 0x80;
    var h = Array.prototype.map.call(b, function (x) { return (x + 0x100).toString(16).slice(1); }).join('');
    return h.slice(0, 8) + '-' + h.slice(8, 12) + '-' + h.slice(12, 16) + '-' + h.slice(16, 20) + '-' + h.slice(20);
  }

  function bridgeError(kind, message) {
    var err = new Error(message);
    err.kind = kind;
    return err;
  }

  function invoke(cmd, payload) {
    return new Promise(function (resolve, reject) {
      var id = newId();
      var text = typeof payload === 'string' ? payload : (payload === undefined ? '' : JSON.stringify(payload));
      var timer = setTimeout(function () {
        if (pending[id]) {
          delete pending[id];
          reject(bridgeError('invoke_timeout', 'native call timeout'));
        }
      }, TIMEOUT_MS);
      pending[id] = { resolve: resolve, reject: reject, timer: timer };
      try {
        post(JSON.stringify({ type: 'invoke', id: id, cmd: cmd, payload: text }));
      } catch (e) {
        clearTimeout(timer);
        delete pending[id];
        reject(bridgeError('bridge_unavailable', String(e && e.message || e)));
      }
    });
  }

  function onMessage(id, result, error) {
    var slot = pending[id];
    if (!slot) { return; }
    delete pending[id];
    clearTimeout(slot.timer);
    if (error) {
      slot.reject(bridgeError(error.kind, error.message));
    } else {
      slot.resolve(result);
    }
  }

  function onEvent(name, data) {
    var fns = listeners[name];
    if (!fns) { return; }
    fns.slice().forEach(function (fn) {
      try { fn(data); } catch (e) { console.error(e); }
    });
  }

  function listen(name, fn) {
    (listeners[name] = listeners[name] || []).push(fn);
    return function () {
      var fns = listeners[name] || [];
      var i = fns.indexOf(fn);
      if (i >= 0) { fns.splice(i, 1); }
    };
  }

  window.__native__ = {
    __crossweb: true,
    post: existing.post,
    invoke: invoke,
    onMessage: onMessage,
    onEvent: onEvent,
    listen: listen
  };
})();
"#;

/// Shim with the given invocation deadline, in milliseconds
pub fn render_bridge_script(timeout_ms: u64) -> String {
    BRIDGE_SCRIPT_TEMPLATE.replace(TIMEOUT_PLACEHOLDER, &timeout_ms.to_string())
}
