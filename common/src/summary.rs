/// Aggregate result of a batch of transfers
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub completed: usize,
    pub aborted: usize,
    pub hook_failures: usize,
    pub cleanup_failures: usize,
}

impl TransferSummary {
    pub fn total(&self) -> usize {
        self.completed + self.aborted
    }
}

impl std::ops::Add for TransferSummary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            completed: self.completed + other.completed,
            aborted: self.aborted + other.aborted,
            hook_failures: self.hook_failures + other.hook_failures,
            cleanup_failures: self.cleanup_failures + other.cleanup_failures,
        }
    }
}

impl std::iter::Sum for TransferSummary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, s| acc + s)
    }
}

impl std::fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "transfers completed: {}", self.completed)?;
        writeln!(f, "transfers aborted: {}", self.aborted)?;
        writeln!(f, "hook failures: {}", self.hook_failures)?;
        writeln!(f, "cleanup failures: {}", self.cleanup_failures)?;
        Ok(())
    }
}
