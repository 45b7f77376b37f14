use refract_protocol::{DrawFlags, ResourceId, Topology};
use tracing::warn;

/// One recorded API call as seen by the replay walk.
///
/// Event ids are dense per frame starting at 1, with separate counters for
/// root events and for events inside each command buffer (rebased onto the
/// root sequence when the buffer's submit is walked).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApiEvent {
    pub event_id: u32,
    pub chunk_kind: u32,
    pub file_offset: u64,
    pub description: String,
    pub callstack: Vec<u64>,
}

/// A node's worth of drawcall data in the frame tree.
#[derive(Clone, Debug)]
pub struct Drawcall {
    pub event_id: u32,
    pub drawcall_id: u32,
    pub name: String,
    pub flags: DrawFlags,
    pub topology: Topology,
    pub index_byte_width: u32,
    pub outputs: [ResourceId; 8],
    pub depth_out: ResourceId,
    pub copy_destination: ResourceId,
    /// API events folded into this drawcall (state setup since the last
    /// drawcall, plus the drawcall's own event).
    pub events: Vec<ApiEvent>,
}

impl Default for Drawcall {
    fn default() -> Self {
        Self {
            event_id: 0,
            drawcall_id: 0,
            name: String::new(),
            flags: DrawFlags::empty(),
            topology: Topology::Unknown,
            index_byte_width: 0,
            outputs: [ResourceId::NULL; 8],
            depth_out: ResourceId::NULL,
            copy_destination: ResourceId::NULL,
            events: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DrawcallTreeNode {
    pub draw: Drawcall,
    pub children: Vec<DrawcallTreeNode>,
}

impl DrawcallTreeNode {
    pub fn new(draw: Drawcall) -> Self {
        Self {
            draw,
            children: Vec::new(),
        }
    }

    /// Shift every event id and drawcall id in the subtree by the given
    /// bases; used when splicing a command buffer's subtree into the root
    /// tree at submit time.
    pub fn rebase(&mut self, event_base: u32, draw_base: u32) {
        self.draw.event_id += event_base;
        self.draw.drawcall_id += draw_base;
        for ev in &mut self.draw.events {
            ev.event_id += event_base;
        }
        for child in &mut self.children {
            child.rebase(event_base, draw_base);
        }
    }

    /// Depth-first iteration over the subtree's drawcalls.
    pub fn walk(&self, visit: &mut impl FnMut(&Drawcall, usize)) {
        self.walk_at(0, visit)
    }

    fn walk_at(&self, depth: usize, visit: &mut impl FnMut(&Drawcall, usize)) {
        visit(&self.draw, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visit);
        }
    }
}

/// Builds a drawcall tree from a linear chunk walk.
///
/// Marker-begin chunks open a nested level, marker-end closes it. The
/// builder refuses to pop below the root, so a log with mismatched markers
/// still bakes a well-formed tree.
#[derive(Debug)]
pub struct DrawTreeBuilder {
    stack: Vec<DrawcallTreeNode>,
}

impl Default for DrawTreeBuilder {
    fn default() -> Self {
        Self {
            stack: vec![DrawcallTreeNode::default()],
        }
    }
}

impl DrawTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a drawcall (with pre-built children) under the current level.
    pub fn add(&mut self, node: DrawcallTreeNode) {
        self.stack
            .last_mut()
            .expect("tree builder always has a root")
            .children
            .push(node);
    }

    /// Open a nested level rooted at a marker drawcall.
    pub fn push_marker(&mut self, draw: Drawcall) {
        self.stack.push(DrawcallTreeNode::new(draw));
    }

    /// Close the current level, attaching it to its parent. Popping at the
    /// root is a log defect; it is refused.
    pub fn pop_marker(&mut self) {
        if self.stack.len() <= 1 {
            warn!("marker end without matching begin, refusing to pop the root");
            return;
        }
        let node = self.stack.pop().expect("checked non-root");
        self.add(node);
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Close any unterminated markers and take the finished tree.
    pub fn bake(&mut self) -> DrawcallTreeNode {
        while self.stack.len() > 1 {
            self.pop_marker();
        }
        std::mem::take(self.stack.last_mut().expect("root"))
    }
}

/// Per-command-buffer accounting accumulated while walking the log.
#[derive(Debug, Default)]
pub struct BakedCmdBufferInfo {
    /// Event counter local to the command buffer, starting at 1 for the
    /// first real command.
    pub cur_event_id: u32,
    pub draw_count: u32,
    /// Events since the last drawcall, pending attachment to the next one.
    pub cur_events: Vec<ApiEvent>,
    /// Every event recorded in the buffer, in local id order.
    pub events: Vec<ApiEvent>,
    pub tree: DrawTreeBuilder,
    /// Finished subtree, set when the buffer's recording ends.
    pub baked: Option<DrawcallTreeNode>,
    /// Root event id at which this buffer was spliced at submit time.
    pub base_event: u32,
    /// Total events in the buffer, fixed when recording ends.
    pub event_count: u32,
}

/// Sorted per-frame event list.
#[derive(Debug, Default)]
pub struct EventIndex {
    events: Vec<ApiEvent>,
}

impl EventIndex {
    pub fn push(&mut self, event: ApiEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = ApiEvent>) {
        self.events.extend(events);
    }

    pub fn sort(&mut self) {
        self.events.sort_by_key(|ev| ev.event_id);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ApiEvent] {
        &self.events
    }

    /// The greatest event with `event_id <= id`. Ids are dense, so with a
    /// valid id this is an exact match; an empty index has no answer.
    pub fn event_for(&self, id: u32) -> Option<&ApiEvent> {
        let idx = self.events.partition_point(|ev| ev.event_id <= id);
        if idx == 0 {
            return self.events.first();
        }
        self.events.get(idx - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(name: &str) -> Drawcall {
        Drawcall {
            name: name.into(),
            ..Drawcall::default()
        }
    }

    #[test]
    fn tree_builder_nests_markers() {
        let mut b = DrawTreeBuilder::new();
        b.add(DrawcallTreeNode::new(draw("clear")));
        b.push_marker(draw("scene"));
        b.add(DrawcallTreeNode::new(draw("draw1")));
        b.add(DrawcallTreeNode::new(draw("draw2")));
        b.pop_marker();
        b.add(DrawcallTreeNode::new(draw("present")));

        let root = b.bake();
        let names: Vec<&str> = root.children.iter().map(|c| c.draw.name.as_str()).collect();
        assert_eq!(names, vec!["clear", "scene", "present"]);
        assert_eq!(root.children[1].children.len(), 2);
    }

    #[test]
    fn tree_builder_refuses_to_pop_the_root() {
        let mut b = DrawTreeBuilder::new();
        b.pop_marker();
        b.pop_marker();
        assert_eq!(b.depth(), 0);
        b.add(DrawcallTreeNode::new(draw("still works")));
        assert_eq!(b.bake().children.len(), 1);
    }

    #[test]
    fn bake_closes_unterminated_markers() {
        let mut b = DrawTreeBuilder::new();
        b.push_marker(draw("outer"));
        b.push_marker(draw("inner"));
        b.add(DrawcallTreeNode::new(draw("leaf")));
        let root = b.bake();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].children[0].children[0].draw.name, "leaf");
    }

    #[test]
    fn rebase_shifts_the_whole_subtree() {
        let mut node = DrawcallTreeNode::new(Drawcall {
            event_id: 1,
            drawcall_id: 1,
            ..Drawcall::default()
        });
        node.children.push(DrawcallTreeNode::new(Drawcall {
            event_id: 2,
            drawcall_id: 2,
            ..Drawcall::default()
        }));
        node.rebase(10, 5);
        assert_eq!(node.draw.event_id, 11);
        assert_eq!(node.children[0].draw.event_id, 12);
        assert_eq!(node.children[0].draw.drawcall_id, 7);
    }

    #[test]
    fn event_for_returns_nearest_at_or_below() {
        let mut index = EventIndex::default();
        for id in [1u32, 2, 3, 5, 6] {
            index.push(ApiEvent {
                event_id: id,
                ..ApiEvent::default()
            });
        }
        index.sort();
        assert_eq!(index.event_for(3).unwrap().event_id, 3);
        assert_eq!(index.event_for(4).unwrap().event_id, 3);
        assert_eq!(index.event_for(100).unwrap().event_id, 6);
        // below the first event the first event is still the answer
        assert_eq!(index.event_for(0).unwrap().event_id, 1);
        assert!(EventIndex::default().event_for(1).is_none());
    }
}
