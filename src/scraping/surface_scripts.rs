//! In-page JavaScript used by the chat page adapter.
//!
//! Every script is an IIFE expression. Values that cross the CDP boundary as
//! structured data are `JSON.stringify`-ed on the page and parsed on our side,
//! so the only thing `evaluate` ever returns is a string or a boolean.
//! Selector lists and ids are embedded as JSON literals, never spliced raw.

use crate::core::config::Selectors;
use crate::types::SurfaceHandle;

/// Attribute the snapshot script stamps on every message element.
pub const HANDLE_ATTR: &str = "data-chatprobe-id";
/// Attribute marking the input control chosen by [`find_input`].
pub const INPUT_ATTR: &str = "data-chatprobe-input";

fn json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Ordered `[{text, author, handle}]` for every outermost message element.
///
/// Elements nested inside another matched element are skipped (the selector
/// list overlaps on most chat UIs), as is anything shorter than 3 chars.
pub fn snapshot(selectors: &Selectors) -> String {
    format!(
        r#"(() => {{
    const selectors = {sels};
    const attr = {attr};
    const roleOf = (v) => {{
        v = (v || '').toLowerCase();
        if (v.includes('assistant')) return 'assistant';
        if (v.includes('user')) return 'user';
        return null;
    }};
    const guessAuthor = (el) => {{
        let role = roleOf(el.getAttribute('data-message-author-role'));
        if (!role) {{
            const owner = el.closest('[data-message-author-role]');
            if (owner) role = roleOf(owner.getAttribute('data-message-author-role'));
        }}
        if (!role) {{
            const cls = ((el.getAttribute('class') || '') + ' ' +
                (el.parentElement ? (el.parentElement.getAttribute('class') || '') : '')).toLowerCase();
            if (/assistant|\bbot\b|\bai\b/.test(cls)) role = 'assistant';
            else if (/\buser\b|human/.test(cls)) role = 'user';
        }}
        return role || 'unknown';
    }};
    const matched = Array.from(document.querySelectorAll(selectors.join(',')));
    const set = new Set(matched);
    const out = [];
    for (const el of matched) {{
        let p = el.parentElement, nested = false;
        while (p) {{ if (set.has(p)) {{ nested = true; break; }} p = p.parentElement; }}
        if (nested) continue;
        const text = (el.innerText || el.textContent || '').trim();
        if (text.length < 3) continue;
        if (!el.getAttribute(attr)) {{
            window.__chatprobeSeq = (window.__chatprobeSeq || 0) + 1;
            el.setAttribute(attr, String(window.__chatprobeSeq));
        }}
        out.push({{ text, author: guessAuthor(el), handle: el.getAttribute(attr) }});
    }}
    return JSON.stringify(out);
}})()"#,
        sels = json(&selectors.messages),
        attr = json(HANDLE_ATTR),
    )
}

/// JSON string of the element's trimmed text, or `"null"` if it is gone.
pub fn read_text(handle: &SurfaceHandle) -> String {
    let selector = format!("[{}=\"{}\"]", HANDLE_ATTR, handle.as_str().replace('"', ""));
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    return el ? JSON.stringify((el.innerText || el.textContent || '').trim()) : 'null';
}})()"#,
        sel = json(&selector),
    )
}

/// `true` while any configured typing indicator is rendered, or while an
/// `aria-live="polite"` region has content.
pub fn is_producing(selectors: &Selectors) -> String {
    format!(
        r#"(() => {{
    const selectors = {sels};
    const shown = (el) => {{
        if (!el.getClientRects().length) return false;
        const s = getComputedStyle(el);
        return s.visibility !== 'hidden' && s.display !== 'none';
    }};
    for (const el of document.querySelectorAll(selectors.join(','))) {{
        if (shown(el)) return true;
    }}
    const live = document.querySelector('[aria-live="polite"]');
    return !!(live && (live.innerText || '').trim() !== '');
}})()"#,
        sels = json(&selectors.typing),
    )
}

/// Locate the chat input, mark it with [`INPUT_ATTR`] and focus it.
///
/// Configured selectors first, then any textarea whose placeholder or
/// aria-label mentions message/type (skipping search boxes), then the last
/// textarea on the page.
pub fn find_input(selectors: &Selectors) -> String {
    format!(
        r#"(() => {{
    const selectors = {sels};
    const attr = {attr};
    document.querySelectorAll('[' + attr + ']').forEach(e => e.removeAttribute(attr));
    let input = null;
    for (const s of selectors) {{
        input = document.querySelector(s);
        if (input) break;
    }}
    if (!input) {{
        const all = Array.from(document.querySelectorAll('textarea'));
        input = all.find(el => {{
            const ph = (el.placeholder || '').toLowerCase();
            const aria = (el.getAttribute('aria-label') || '').toLowerCase();
            if (ph.includes('search') || aria.includes('search')) return false;
            return ph.includes('message') || ph.includes('type') ||
                aria.includes('message') || aria.includes('type');
        }}) || all[all.length - 1] || null;
    }}
    if (!input) return false;
    input.setAttribute(attr, '1');
    input.focus();
    return true;
}})()"#,
        sels = json(&selectors.input),
        attr = json(INPUT_ATTR),
    )
}

/// Write into the marked input through the native value setter so framework
/// listeners (React et al.) see an `input` event. `reset` replaces the value,
/// otherwise `chunk` is appended.
pub fn write_input(chunk: &str, reset: bool) -> String {
    format!(
        r#"(() => {{
    const input = document.querySelector('[' + {attr} + ']');
    if (!input) return false;
    const chunk = {chunk};
    const setter = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(input), 'value').set;
    setter.call(input, {reset} ? chunk : input.value + chunk);
    input.dispatchEvent(new Event('input', {{ bubbles: true }}));
    return true;
}})()"#,
        attr = json(INPUT_ATTR),
        chunk = json(chunk),
        reset = reset,
    )
}

/// Click an enabled send button near the marked input, else press Enter.
/// Returns `"clicked"`, `"enter"` or `"missing"`.
pub fn send(selectors: &Selectors) -> String {
    format!(
        r#"(() => {{
    const input = document.querySelector('[' + {attr} + ']');
    if (!input) return 'missing';
    const selectors = {sels};
    const scopes = [input.closest('form'), input.parentElement].filter(Boolean);
    for (const scope of scopes) {{
        for (const s of selectors) {{
            const b = scope.querySelector(s);
            if (b && !b.disabled) {{ b.click(); return 'clicked'; }}
        }}
    }}
    input.dispatchEvent(new KeyboardEvent('keydown', {{
        key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true
    }}));
    return 'enter';
}})()"#,
        attr = json(INPUT_ATTR),
        sels = json(&selectors.send_button),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_embedded_as_json_literals() {
        let selectors = Selectors {
            messages: vec![r#"div[data-x="a'b"]"#.into()],
            ..Selectors::default()
        };
        let js = snapshot(&selectors);
        assert!(js.contains(r#"["div[data-x=\"a'b\"]"]"#));
        assert!(js.contains(r#""data-chatprobe-id""#));
    }

    #[test]
    fn prompt_text_cannot_break_out_of_the_script() {
        let js = write_input("\"); alert(1); (\"", false);
        assert!(js.contains(r#"const chunk = "\"); alert(1); (\"";"#));
        assert!(js.contains("false ? chunk"));
    }

    #[test]
    fn read_text_targets_the_handle_attribute() {
        let js = read_text(&SurfaceHandle::new("42"));
        assert!(js.contains(r#"document.querySelector("[data-chatprobe-id=\"42\"]")"#));
    }

    #[test]
    fn typing_script_uses_typing_selectors() {
        let selectors = Selectors {
            typing: vec![".thinking-dots".into()],
            ..Selectors::default()
        };
        assert!(is_producing(&selectors).contains(r#"[".thinking-dots"]"#));
    }
}
