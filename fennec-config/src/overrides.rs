/// Settings that can be overridden from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub replica_path: Option<std::path::PathBuf>,
}
