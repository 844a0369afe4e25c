/// Hands out the ids used for per-timeline property gating (deform and sequence timelines match
/// attachments by these ids rather than by name).
///
/// The loader owns one allocator and threads it through every attachment it builds, so ids are
/// unique within everything that allocator produced and nothing is process-global.
#[derive(Clone, Debug, Default)]
pub struct IdAllocator {
    next_vertex: u32,
    next_sequence: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_vertex_id(&mut self) -> u32 {
        let id = self.next_vertex;
        self.next_vertex = self.next_vertex.wrapping_add(1);
        id
    }

    pub fn next_sequence_id(&mut self) -> u32 {
        let id = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        id
    }
}
