//! In-memory render tree for exercising the geometry core without a browser.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{DomHost, NodeId, NodeInfo, ScrollMetrics};
use crate::geometry::{Point, Rect, Size};

/// Document id of the top-level document.
pub const TOP: usize = 0;

struct Doc {
    viewport: Size,
    content_height: f64,
    scroll_top: f64,
    body: usize,
    frame: Option<usize>,
}

struct Scroller {
    content_height: f64,
    overflow_y: String,
    scroll_top: f64,
}

struct FakeNode {
    doc: usize,
    parent: Option<usize>,
    layout: Rect,
    tag: String,
    frame_doc: Option<usize>,
    scroller: Option<Scroller>,
    text: Vec<String>,
    attrs: HashMap<String, String>,
    outline: Option<String>,
    attached: bool,
    clicks: u32,
}

#[derive(Default)]
struct State {
    docs: Vec<Doc>,
    nodes: Vec<FakeNode>,
    frame_urls: Vec<String>,
    selectors: HashMap<(Option<usize>, String), usize>,
    focused: Option<usize>,
    frames_yielded: u32,
    scroll_calls: u32,
    hit_tests: u32,
    viewport_reads: u32,
}

/// A page whose layout is declared up front. Later-added nodes paint on
/// top of earlier ones.
pub struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    /// Top document with the given viewport and scrollable content height.
    pub fn new(width: f64, height: f64, content_height: f64) -> Self {
        let page = Self {
            state: Mutex::new(State::default()),
        };
        {
            let mut s = page.state.lock().unwrap();
            push_doc(&mut s, Size::new(width, height), content_height, None);
        }
        page
    }

    pub fn body(&self, doc: usize) -> NodeId {
        NodeId(self.state.lock().unwrap().docs[doc].body as u64)
    }

    /// Add an element with a document-space layout box.
    pub fn add(&self, parent: NodeId, tag: &str, layout: Rect) -> NodeId {
        let mut s = self.state.lock().unwrap();
        let parent = parent.0 as usize;
        let doc = s.nodes[parent].doc;
        let id = s.nodes.len();
        s.nodes.push(node(doc, Some(parent), tag, layout));
        NodeId(id as u64)
    }

    /// Add an iframe hosting a new document; returns the element and doc id.
    pub fn add_frame(
        &self,
        parent: NodeId,
        layout: Rect,
        src: &str,
        content_height: f64,
    ) -> (NodeId, usize) {
        let mut s = self.state.lock().unwrap();
        let parent = parent.0 as usize;
        let doc = s.nodes[parent].doc;
        let id = s.nodes.len();
        let mut frame = node(doc, Some(parent), "iframe", layout);
        frame.attrs.insert("src".to_string(), src.to_string());
        s.nodes.push(frame);
        let child = push_doc(
            &mut s,
            Size::new(layout.width, layout.height),
            content_height,
            Some(id),
        );
        s.nodes[id].frame_doc = Some(child);
        s.frame_urls.push(format!("https://frames.test/embed?u={}", src));
        (NodeId(id as u64), child)
    }

    pub fn make_scrollable(&self, node: NodeId, content_height: f64, overflow_y: &str) {
        let mut s = self.state.lock().unwrap();
        s.nodes[node.0 as usize].scroller = Some(Scroller {
            content_height,
            overflow_y: overflow_y.to_string(),
            scroll_top: 0.0,
        });
    }

    /// Register what `query_selector(scope, selector)` returns.
    pub fn register_selector(&self, scope: Option<NodeId>, selector: &str, node: NodeId) {
        let mut s = self.state.lock().unwrap();
        s.selectors.insert(
            (scope.map(|n| n.0 as usize), selector.to_string()),
            node.0 as usize,
        );
    }

    pub fn set_text(&self, node: NodeId, text: &[&str]) {
        let mut s = self.state.lock().unwrap();
        s.nodes[node.0 as usize].text = text.iter().map(|t| t.to_string()).collect();
    }

    pub fn set_focus(&self, node: Option<NodeId>) {
        self.state.lock().unwrap().focused = node.map(|n| n.0 as usize);
    }

    pub fn detach(&self, node: NodeId) {
        self.state.lock().unwrap().nodes[node.0 as usize].attached = false;
    }

    pub fn scroll_document(&self, doc: usize, scroll_top: f64) {
        self.state.lock().unwrap().docs[doc].scroll_top = scroll_top;
    }

    pub fn document_scroll(&self, doc: usize) -> f64 {
        self.state.lock().unwrap().docs[doc].scroll_top
    }

    pub fn outline(&self, node: NodeId) -> Option<String> {
        self.state.lock().unwrap().nodes[node.0 as usize].outline.clone()
    }

    pub fn clicks(&self, node: NodeId) -> u32 {
        self.state.lock().unwrap().nodes[node.0 as usize].clicks
    }

    pub fn frames_yielded(&self) -> u32 {
        self.state.lock().unwrap().frames_yielded
    }

    pub fn scroll_calls(&self) -> u32 {
        self.state.lock().unwrap().scroll_calls
    }

    /// Top-level `element_from_point` calls so far.
    pub fn hit_tests(&self) -> u32 {
        self.state.lock().unwrap().hit_tests
    }

    pub fn viewport_reads(&self) -> u32 {
        self.state.lock().unwrap().viewport_reads
    }
}

fn node(doc: usize, parent: Option<usize>, tag: &str, layout: Rect) -> FakeNode {
    FakeNode {
        doc,
        parent,
        layout,
        tag: tag.to_string(),
        frame_doc: None,
        scroller: None,
        text: Vec::new(),
        attrs: HashMap::new(),
        outline: None,
        attached: true,
        clicks: 0,
    }
}

fn push_doc(s: &mut State, viewport: Size, content_height: f64, frame: Option<usize>) -> usize {
    let doc = s.docs.len();
    let body = s.nodes.len();
    s.nodes.push(node(
        doc,
        None,
        "body",
        Rect::new(0.0, 0.0, viewport.width, content_height.max(viewport.height)),
    ));
    s.docs.push(Doc {
        viewport,
        content_height,
        scroll_top: 0.0,
        body,
        frame,
    });
    doc
}

impl State {
    fn attached(&self, id: usize) -> bool {
        let mut cur = Some(id);
        while let Some(i) = cur {
            if !self.nodes[i].attached {
                return false;
            }
            cur = self.nodes[i].parent;
        }
        true
    }

    fn client_rect(&self, id: usize) -> Rect {
        let n = &self.nodes[id];
        let mut offset = self.docs[n.doc].scroll_top;
        let mut cur = n.parent;
        while let Some(p) = cur {
            if let Some(sc) = &self.nodes[p].scroller {
                offset += sc.scroll_top;
            }
            cur = self.nodes[p].parent;
        }
        n.layout.translate(0.0, -offset)
    }

    fn visible_at(&self, id: usize, p: Point) -> bool {
        let inside = |r: &Rect| p.x >= r.x && p.y >= r.y && p.x < r.right() && p.y < r.bottom();
        if !inside(&self.client_rect(id)) {
            return false;
        }
        let mut cur = self.nodes[id].parent;
        while let Some(a) = cur {
            if self.nodes[a].scroller.is_some() && !inside(&self.client_rect(a)) {
                return false;
            }
            cur = self.nodes[a].parent;
        }
        true
    }

    fn metrics(&self, id: usize) -> ScrollMetrics {
        let n = &self.nodes[id];
        if self.docs[n.doc].body == id {
            let doc = &self.docs[n.doc];
            return ScrollMetrics {
                scroll_height: doc.content_height,
                client_height: doc.viewport.height,
                overflow_y: "visible".to_string(),
            };
        }
        match &n.scroller {
            Some(sc) => ScrollMetrics {
                scroll_height: sc.content_height,
                client_height: n.layout.height,
                overflow_y: sc.overflow_y.clone(),
            },
            None => ScrollMetrics {
                scroll_height: n.layout.height,
                client_height: n.layout.height,
                overflow_y: "visible".to_string(),
            },
        }
    }

    /// Reveal `id` inside its nearest scrolling container, then reveal that
    /// container, up to the document.
    fn reveal(&mut self, id: usize) {
        let target = self.client_rect(id);
        let mut cur = self.nodes[id].parent;
        while let Some(a) = cur {
            let scrolls = self.nodes[a].scroller.is_some() && self.metrics(a).is_scrollable();
            if scrolls && self.docs[self.nodes[a].doc].body != a {
                let vis = self.client_rect(a);
                let delta = reveal_delta(&target, &vis);
                let max = self.metrics(a).scroll_height - self.metrics(a).client_height;
                if let Some(sc) = self.nodes[a].scroller.as_mut() {
                    sc.scroll_top = (sc.scroll_top + delta).clamp(0.0, max.max(0.0));
                }
                self.reveal(a);
                return;
            }
            cur = self.nodes[a].parent;
        }
        let doc = self.nodes[id].doc;
        let d = &self.docs[doc];
        let vis = Rect::new(0.0, 0.0, d.viewport.width, d.viewport.height);
        let delta = reveal_delta(&target, &vis);
        let max = (d.content_height - d.viewport.height).max(0.0);
        let d = &mut self.docs[doc];
        d.scroll_top = (d.scroll_top + delta).clamp(0.0, max);
    }
}

fn reveal_delta(el: &Rect, vis: &Rect) -> f64 {
    if el.y < vis.y {
        el.y - vis.y
    } else if el.bottom() > vis.bottom() {
        (el.bottom() - vis.bottom()).min(el.y - vis.y)
    } else {
        0.0
    }
}

fn scope_doc(s: &State, scope: Option<NodeId>) -> Option<usize> {
    match scope {
        None => Some(TOP),
        Some(frame) => s.nodes.get(frame.0 as usize).and_then(|n| n.frame_doc),
    }
}

#[async_trait]
impl DomHost for FakePage {
    async fn viewport(&self) -> Result<Size> {
        let mut s = self.state.lock().unwrap();
        s.viewport_reads += 1;
        Ok(s.docs[TOP].viewport)
    }

    async fn element_from_point(
        &self,
        scope: Option<NodeId>,
        point: Point,
    ) -> Result<Option<NodeId>> {
        let mut s = self.state.lock().unwrap();
        if scope.is_none() {
            s.hit_tests += 1;
        }
        let Some(doc) = scope_doc(&s, scope) else {
            return Ok(None);
        };
        let vp = s.docs[doc].viewport;
        if !vp.contains(point) {
            return Ok(None);
        }
        let hit = (0..s.nodes.len())
            .rev()
            .filter(|&i| s.nodes[i].doc == doc && s.attached(i))
            .find(|&i| s.visible_at(i, point));
        Ok(hit.map(|i| NodeId(i as u64)))
    }

    async fn node_info(&self, node: NodeId) -> Result<Option<NodeInfo>> {
        let s = self.state.lock().unwrap();
        let i = node.0 as usize;
        if i >= s.nodes.len() || !s.attached(i) {
            return Ok(None);
        }
        Ok(Some(NodeInfo {
            rect: s.client_rect(i),
            is_frame: s.nodes[i].frame_doc.is_some(),
            tag: s.nodes[i].tag.clone(),
        }))
    }

    async fn owner_frame(&self, node: NodeId) -> Result<Option<NodeId>> {
        let s = self.state.lock().unwrap();
        let doc = s.nodes[node.0 as usize].doc;
        Ok(s.docs[doc].frame.map(|f| NodeId(f as u64)))
    }

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        let s = self.state.lock().unwrap();
        Ok(s.nodes[node.0 as usize].parent.map(|p| NodeId(p as u64)))
    }

    async fn body(&self, scope: Option<NodeId>) -> Result<Option<NodeId>> {
        let s = self.state.lock().unwrap();
        Ok(scope_doc(&s, scope).map(|d| NodeId(s.docs[d].body as u64)))
    }

    async fn query_selector(
        &self,
        scope: Option<NodeId>,
        selector: &str,
    ) -> Result<Option<NodeId>> {
        let s = self.state.lock().unwrap();
        let key = (scope.map(|n| n.0 as usize), selector.to_string());
        Ok(s.selectors
            .get(&key)
            .copied()
            .filter(|&i| s.attached(i))
            .map(|i| NodeId(i as u64)))
    }

    async fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        let s = self.state.lock().unwrap();
        Ok(s.nodes[node.0 as usize].attrs.get(name).cloned())
    }

    async fn frame_urls(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().frame_urls.clone())
    }

    async fn scroll_metrics(&self, node: NodeId) -> Result<Option<ScrollMetrics>> {
        let s = self.state.lock().unwrap();
        let i = node.0 as usize;
        if !s.attached(i) {
            return Ok(None);
        }
        Ok(Some(s.metrics(i)))
    }

    async fn scroll_into_view_if_needed(&self, node: NodeId) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.scroll_calls += 1;
        let i = node.0 as usize;
        if s.attached(i) {
            s.reveal(i);
        }
        Ok(())
    }

    async fn next_frame(&self) -> Result<()> {
        self.state.lock().unwrap().frames_yielded += 1;
        Ok(())
    }

    async fn contains(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        let s = self.state.lock().unwrap();
        let mut cur = Some(node.0 as usize);
        while let Some(i) = cur {
            if i == ancestor.0 as usize {
                return Ok(true);
            }
            cur = s.nodes[i].parent;
        }
        Ok(false)
    }

    async fn set_outline(&self, node: NodeId, outline: Option<&str>) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.nodes[node.0 as usize].outline = outline.map(|o| o.to_string());
        Ok(())
    }

    async fn click(&self, node: NodeId) -> Result<()> {
        self.state.lock().unwrap().nodes[node.0 as usize].clicks += 1;
        Ok(())
    }

    async fn text_fragments(&self, node: NodeId) -> Result<Vec<String>> {
        let s = self.state.lock().unwrap();
        let root = node.0 as usize;
        let mut out = Vec::new();
        for i in 0..s.nodes.len() {
            let mut cur = Some(i);
            while let Some(c) = cur {
                if c == root {
                    out.extend(s.nodes[i].text.iter().cloned());
                    break;
                }
                cur = s.nodes[c].parent;
            }
        }
        Ok(out)
    }

    async fn focused_element(&self) -> Result<Option<NodeId>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .focused
            .map(|i| NodeId(i as u64)))
    }
}
