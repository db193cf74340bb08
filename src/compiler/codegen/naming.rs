/// Fresh-name source scoped to a single render call.
///
/// Names are `prefix` followed by a counter starting at 1, so two renders
/// of the same IR always produce the same identifiers.
#[derive(Debug, Default)]
pub struct NameGen {
    counter: u32,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}{}", prefix, self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_per_instance() {
        let mut a = NameGen::new();
        assert_eq!(a.fresh("parts"), "parts1");
        assert_eq!(a.fresh("shards"), "shards2");
        let mut b = NameGen::new();
        assert_eq!(b.fresh("parts"), "parts1");
    }
}
