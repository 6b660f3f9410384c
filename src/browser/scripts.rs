//! Page-side scripts.
//!
//! Elements are handed to Rust as numeric ids from a registry kept on the
//! top window (`__trRegistry`). The registry holds weak references only, and
//! an id whose element is gone or disconnected resolves to `null`.

/// Registry helpers shared by every evaluated snippet.
pub const PRELUDE: &str = r#"
const __top = (() => { try { void window.top.document; return window.top; } catch (_) { return window; } })();
const R = __top.__trRegistry || (__top.__trRegistry = { next: 1, ids: new WeakMap(), refs: new Map() });
const reg = (el) => {
    if (!el) return null;
    let id = R.ids.get(el);
    if (id === undefined) {
        id = R.next++;
        R.ids.set(el, id);
        R.refs.set(id, new WeakRef(el));
    }
    return id;
};
const get = (id) => {
    if (id === null || id === undefined) return null;
    const ref = R.refs.get(id);
    const el = ref && ref.deref();
    if (!el || !el.isConnected) {
        R.refs.delete(id);
        return null;
    }
    return el;
};
const doc = (scope) => {
    if (scope === null || scope === undefined) return document;
    const frame = get(scope);
    if (!frame) return null;
    try { return frame.contentDocument; } catch (_) { return null; }
};
const query = (d, sel) => {
    if (sel.startsWith('/') || sel.startsWith('(')) {
        return d.evaluate(sel, d, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
    }
    return d.querySelector(sel);
};
"#;

/// Wrap `body`, a JS function of one argument, into a self-contained
/// expression called with `args`.
///
/// The result is boxed as `{ v: ... }` because CDP drops a bare `null`
/// return value.
pub fn call_expression(body: &str, args: &serde_json::Value) -> String {
    format!(
        "(() => {{ {prelude}\n const __args = {args};\n return Promise.resolve(({body})(__args)).then((v) => ({{ v: v === undefined ? null : v }})); }})()",
        prelude = PRELUDE,
        args = args,
        body = body
    )
}

pub const VIEWPORT: &str = "() => ({ width: window.innerWidth, height: window.innerHeight })";

pub const ELEMENT_FROM_POINT: &str = r#"(a) => {
    const d = doc(a.scope);
    if (!d) return null;
    return reg(d.elementFromPoint(a.x, a.y));
}"#;

pub const NODE_INFO: &str = r#"(a) => {
    const el = get(a.id);
    if (!el) return null;
    const r = el.getBoundingClientRect();
    return {
        rect: { x: r.left, y: r.top, width: r.width, height: r.height },
        is_frame: el.tagName === 'IFRAME' || el.tagName === 'FRAME',
        tag: el.tagName.toLowerCase(),
    };
}"#;

pub const OWNER_FRAME: &str = r#"(a) => {
    const el = get(a.id);
    if (!el) return null;
    const w = el.ownerDocument.defaultView;
    try { return w && w.frameElement ? reg(w.frameElement) : null; } catch (_) { return null; }
}"#;

pub const PARENT: &str = r#"(a) => {
    const el = get(a.id);
    return el ? reg(el.parentElement) : null;
}"#;

pub const BODY: &str = r#"(a) => {
    const d = doc(a.scope);
    return d ? reg(d.body) : null;
}"#;

pub const QUERY_SELECTOR: &str = r#"(a) => {
    const d = doc(a.scope);
    return d ? reg(query(d, a.selector)) : null;
}"#;

pub const ATTRIBUTE: &str = r#"(a) => {
    const el = get(a.id);
    return el ? el.getAttribute(a.name) : null;
}"#;

pub const SCROLL_METRICS: &str = r#"(a) => {
    const el = get(a.id);
    if (!el) return null;
    return {
        scroll_height: el.scrollHeight,
        client_height: el.clientHeight,
        overflow_y: getComputedStyle(el).overflowY,
    };
}"#;

pub const SCROLL_INTO_VIEW: &str = r#"(a) => {
    const el = get(a.id);
    if (!el) return false;
    if (typeof el.scrollIntoViewIfNeeded === 'function') {
        el.scrollIntoViewIfNeeded(false);
    } else {
        el.scrollIntoView({ block: 'nearest', inline: 'nearest' });
    }
    return true;
}"#;

/// Resolves after the next animation frame, or after 100ms when frames are
/// throttled.
pub const NEXT_FRAME: &str = r#"() => new Promise((resolve) => {
    let done = false;
    const finish = () => { if (!done) { done = true; resolve(true); } };
    requestAnimationFrame(finish);
    setTimeout(finish, 100);
})"#;

pub const CONTAINS: &str = r#"(a) => {
    const ancestor = get(a.ancestor);
    const node = get(a.node);
    return !!(ancestor && node && ancestor.contains(node));
}"#;

pub const SET_OUTLINE: &str = r#"(a) => {
    const el = get(a.id);
    if (!el || !el.style) return false;
    if (a.outline === null) {
        el.style.removeProperty('outline');
    } else {
        el.style.outline = a.outline;
    }
    return true;
}"#;

pub const CLICK: &str = r#"(a) => {
    let el = get(a.id);
    if (!el) return false;
    if (typeof el.click !== 'function') {
        el = el.querySelector('button, a, input[type="button"], input[type="submit"], input[type="checkbox"], input[type="radio"]');
    }
    if (!el || typeof el.click !== 'function') return false;
    el.click();
    return true;
}"#;

pub const TEXT_FRAGMENTS: &str = r#"(a) => {
    const el = get(a.id);
    if (!el) return [];
    const out = [];
    const walker = el.ownerDocument.createTreeWalker(el, NodeFilter.SHOW_TEXT);
    while (walker.nextNode()) {
        const t = walker.currentNode.textContent.trim();
        if (t) out.push(t);
    }
    return out;
}"#;

pub const FOCUSED_ELEMENT: &str = r#"() => {
    let el = document.activeElement;
    while (el && (el.tagName === 'IFRAME' || el.tagName === 'FRAME')) {
        let inner = null;
        try { inner = el.contentDocument && el.contentDocument.activeElement; } catch (_) {}
        if (!inner) break;
        el = inner;
    }
    return reg(el);
}"#;

/// Name of the CDP binding the capture script reports through.
pub const CAPTURE_BINDING: &str = "__trCapture";

/// Installed in every document of a recording page. Coordinates are
/// translated to the top viewport; cross-origin frames stay silent.
pub fn capture_script() -> String {
    format!(
        r#"(() => {{
    if (window.__trCaptureInstalled) return;
    window.__trCaptureInstalled = true;
    {prelude}
    if (__top !== window.top) return;
    const binding = '{binding}';
    const send = (event) => {{
        const fn = window[binding] || __top[binding];
        if (typeof fn === 'function') fn(JSON.stringify(event));
    }};
    const active = () => __top.__trRecording !== false;
    const offset = () => {{
        let x = 0, y = 0, w = window;
        while (w !== __top) {{
            const f = w.frameElement;
            if (!f) return null;
            const r = f.getBoundingClientRect();
            x += r.left;
            y += r.top;
            w = w.parent;
        }}
        return {{ x, y }};
    }};
    let lastMove = 0;
    document.addEventListener('mousemove', (e) => {{
        if (!e.isTrusted || !active()) return;
        const now = Date.now();
        if (now - lastMove < 50) return;
        lastMove = now;
        const o = offset();
        if (o) send({{ type: 'mousemove', x: e.clientX + o.x, y: e.clientY + o.y }});
    }}, true);
    window.addEventListener('click', (e) => {{
        if (!e.isTrusted || !active()) return;
        const o = offset();
        if (!o) return;
        e.preventDefault();
        e.stopPropagation();
        e.stopImmediatePropagation();
        send({{ type: 'click', x: e.clientX + o.x, y: e.clientY + o.y }});
    }}, true);
    const lastTop = new WeakMap();
    const docScroller = () => document.scrollingElement || document.documentElement;
    if (docScroller()) lastTop.set(docScroller(), docScroller().scrollTop);
    // Baselines for containers, taken before the scroll they cause.
    const seed = (e) => {{
        for (let n = e.target; n && n.nodeType === 1; n = n.parentElement) {{
            if (!lastTop.has(n)) lastTop.set(n, n.scrollTop);
        }}
        const d = docScroller();
        if (d && !lastTop.has(d)) lastTop.set(d, d.scrollTop);
    }};
    let wheelY = 0, wheelAt = 0;
    window.addEventListener('wheel', (e) => {{
        seed(e);
        wheelY = e.deltaY;
        wheelAt = Date.now();
    }}, {{ capture: true, passive: true }});
    window.addEventListener('pointerdown', seed, true);
    window.addEventListener('keydown', seed, true);
    window.addEventListener('scroll', (e) => {{
        const t = e.target;
        const isDoc = t === document || t === document.documentElement || t === document.scrollingElement;
        const node = isDoc ? docScroller() : t;
        if (!node) return;
        const known = lastTop.has(node);
        const prev = known ? lastTop.get(node) : node.scrollTop;
        lastTop.set(node, node.scrollTop);
        if (!active()) return;
        let deltaY = node.scrollTop - prev;
        if (!known) {{
            // No baseline: only a recent wheel tells the direction.
            if (Date.now() - wheelAt > 500 || wheelY === 0) return;
            deltaY = wheelY;
        }}
        if (deltaY === 0) return;
        const target = isDoc ? (window === __top ? null : reg(document.body)) : reg(t);
        send({{ type: 'scroll', target, deltaY }});
    }}, true);
    document.addEventListener('keydown', (e) => {{
        if (!e.isTrusted || !active()) return;
        send({{ type: 'keydown', key: e.key }});
    }}, true);
}})();"#,
        prelude = PRELUDE,
        binding = CAPTURE_BINDING
    )
}

/// Toggle event capture in the current top document.
pub fn set_capture_active(active: bool) -> String {
    format!("(() => {{ window.__trRecording = {}; return true; }})()", active)
}

pub const ASK_INSTRUCTION: &str = r#"() => {
    const v = prompt("Add the instruction to the action you did.");
    return v === null ? null : String(v);
}"#;
