// The one recognized configuration option from spec §6.

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Config {
    /// After this many committer restarts/refreshes, abandon (spec §4.1
    /// "Failure semantics": a modelling bound; real deployments rely on the
    /// preventer path to finalize any abandoned transaction).
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config { max_attempts: 5 }
    }
}

impl Config {
    pub fn new(max_attempts: u32) -> Self {
        assert!(max_attempts > 0, "max_attempts must be positive");
        Config { max_attempts }
    }
}
