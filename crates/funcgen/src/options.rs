#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Fold constants before generating closures.
    pub optimize: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { optimize: true }
    }
}
