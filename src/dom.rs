use anyhow::Result;
use headless_chrome::Tab;
use std::sync::Arc;

use crate::types::DOM_SNAPSHOT_MAX_CHARS;

/// JavaScript injected into the page to produce a simplified DOM representation.
/// NON-DESTRUCTIVE: reads the DOM without modifying styles or layout.
///
/// The script:
///   1. Skips script, style, noscript, svg elements (does NOT remove them).
///   2. Walks the visible DOM tree (max depth 15).
///   3. Assigns sequential IDs [e0], [e1], ... to interactive elements
///      (a, button, input, textarea, select, [role=button]) via data-eid
///      attributes. File inputs and elements that look like upload triggers
///      are labelled so the agent can target ClickAndUpload at them.
///   4. Emits a compact one-line-per-element text representation.
const SNAPSHOT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','SVG','LINK']);
  let id = 0;
  const lines = [];
  const seen = new Set();

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && el.tagName !== 'HTML') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function walk(node, depth) {
    if (depth > 15) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();
      const interactive = ['a','button','input','textarea','select'].includes(tag)
        || child.getAttribute('role') === 'button';

      if (interactive) {
        const eid = '[e' + (id++) + ']';
        child.setAttribute('data-eid', eid);
        let desc = '';
        if (tag === 'a') {
          desc = eid + ' link "' + (child.textContent||'').trim().slice(0,60) + '"';
        } else if (tag === 'input' && child.type === 'file') {
          desc = eid + ' file-input name=' + (child.name||'');
        } else if (tag === 'input' || tag === 'textarea') {
          desc = eid + ' ' + tag + ' type=' + (child.type||'text') + ' placeholder="' + (child.placeholder||'') + '"';
          if (child.name) desc += ' name=' + child.name;
          if (child.value) desc += ' value="' + child.value.slice(0,30) + '"';
        } else if (tag === 'select') {
          const opts = [...child.options].map(o => o.text.trim().slice(0,20)).join('|');
          desc = eid + ' select [' + opts + ']';
        } else {
          desc = eid + ' button "' + (child.textContent||'').trim().slice(0,60) + '"';
        }
        if (desc && !seen.has(desc)) {
          seen.add(desc);
          lines.push(desc);
        }
      } else {
        const text = child.textContent ? child.textContent.trim() : '';
        if (text && text.length > 2 && text.length < 200 && child.children.length === 0) {
          const t = text.slice(0, 100);
          if (!seen.has(t)) {
            seen.add(t);
            lines.push('  "' + t + '"');
          }
        }
      }
      walk(child, depth + 1);
    }
  }

  walk(document.body, 0);
  return lines.join('\n');
})()
"#;

/// Capture a simplified DOM snapshot from the current page.
pub fn capture_dom_snapshot(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate(SNAPSHOT_JS, false)?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();

    Ok(truncate_snapshot(raw))
}

/// Cap the snapshot at DOM_SNAPSHOT_MAX_CHARS bytes, cutting on a char
/// boundary so non-ASCII pages cannot split a multi-byte character.
fn truncate_snapshot(raw: String) -> String {
    if raw.len() <= DOM_SNAPSHOT_MAX_CHARS {
        return raw;
    }
    let mut cut = DOM_SNAPSHOT_MAX_CHARS;
    while !raw.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [truncated, {} total chars]",
        &raw[..cut],
        raw.len()
    )
}

/// CSS selector for the element the snapshot numbered `index`.
pub fn selector_for_index(index: usize) -> String {
    format!("[data-eid=\"[e{}]\"]", index)
}

/// Get the current page URL.
pub fn get_current_url(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("window.location.href", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string()))
}

/// Get the current page title.
pub fn get_page_title(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("document.title", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "untitled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_targets_snapshot_ids() {
        assert_eq!(selector_for_index(0), r#"[data-eid="[e0]"]"#);
        assert_eq!(selector_for_index(12), r#"[data-eid="[e12]"]"#);
    }

    #[test]
    fn short_snapshot_passes_through_untouched() {
        let raw = "[e0] button \"Télécharger\"".to_string();
        assert_eq!(truncate_snapshot(raw.clone()), raw);
    }

    #[test]
    fn truncation_never_splits_a_multibyte_character() {
        // A two-byte character straddles the cut point.
        let mut raw = "a".repeat(DOM_SNAPSHOT_MAX_CHARS - 1);
        raw.push_str(&"é".repeat(600));

        let out = truncate_snapshot(raw.clone());
        assert!(out.contains("truncated"), "got: {}", out);
        assert!(out.contains(&format!("{} total chars", raw.len())));

        // And an all-multibyte snapshot for good measure.
        let wide = "日".repeat(DOM_SNAPSHOT_MAX_CHARS);
        let out = truncate_snapshot(wide);
        assert!(out.contains("truncated"));
    }
}
