use super::models::BatchResult;
use futures::{Stream, StreamExt};

/// Folds partial batch results into one report. Counters are summed and
/// errors keep their emission order.
#[derive(Debug, Default, Clone)]
pub struct ResultAggregator {
    total: BatchResult,
    batches: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, result: BatchResult) {
        self.batches += 1;
        self.total.merge(result);
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn finish(self) -> BatchResult {
        self.total
    }

    pub async fn aggregate<S>(results: S) -> BatchResult
    where
        S: Stream<Item = BatchResult>,
    {
        results
            .fold(ResultAggregator::new(), |mut agg, result| async move {
                agg.absorb(result);
                agg
            })
            .await
            .finish()
    }
}

impl FromIterator<BatchResult> for ResultAggregator {
    fn from_iter<T: IntoIterator<Item = BatchResult>>(iter: T) -> Self {
        let mut agg = ResultAggregator::new();
        for result in iter {
            agg.absorb(result);
        }
        agg
    }
}
