/// Minimal stack abstraction used by the interpreter.
///
/// Depth-addressed accessors count from the top: depth 1 is the last item
/// pushed. Callers check [`ScriptStack::len`] before indexing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptStack {
    items: Vec<Vec<u8>>,
}

impl ScriptStack {
    pub fn items(&self) -> &[Vec<u8>] {
        &self.items
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.items.push(data);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.push(if value { vec![1] } else { Vec::new() });
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.items.pop()
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.items.last()
    }

    pub fn top(&self, depth: usize) -> &Vec<u8> {
        &self.items[self.items.len() - depth]
    }

    pub fn top_mut(&mut self, depth: usize) -> &mut Vec<u8> {
        let len = self.items.len();
        &mut self.items[len - depth]
    }

    pub fn remove(&mut self, depth: usize) -> Vec<u8> {
        let len = self.items.len();
        self.items.remove(len - depth)
    }

    /// Inserts `data` so that it ends up at `depth` once inserted.
    pub fn insert(&mut self, depth: usize, data: Vec<u8>) {
        let len = self.items.len();
        self.items.insert(len + 1 - depth, data);
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        let len = self.items.len();
        self.items.swap(len - a, len - b);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
