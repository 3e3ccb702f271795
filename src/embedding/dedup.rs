//! Collapse repeated texts to one provider input each, then fan the
//! per-text results back out to every input position.

use std::collections::HashMap;

use context_embed_core::models::EmbeddingResult;

pub(crate) struct Deduplicated {
    unique: Vec<String>,
    positions: Vec<Vec<usize>>,
}

impl Deduplicated {
    /// Group `(input position, text)` pairs by text, keeping first-seen order.
    pub(crate) fn new<'a>(items: impl IntoIterator<Item = (usize, &'a String)>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        let mut positions: Vec<Vec<usize>> = Vec::new();
        let mut seen: HashMap<&'a str, usize> = HashMap::new();

        for (i, text) in items {
            match seen.get(text.as_str()) {
                Some(&u) => positions[u].push(i),
                None => {
                    seen.insert(text.as_str(), unique.len());
                    unique.push(text.clone());
                    positions.push(vec![i]);
                }
            }
        }

        Self { unique, positions }
    }

    pub(crate) fn unique(&self) -> &[String] {
        &self.unique
    }

    /// Number of input positions covered.
    pub(crate) fn inputs(&self) -> usize {
        self.positions.iter().map(Vec::len).sum()
    }

    /// Copy `results[u]` into every slot that held unique text `u`.
    ///
    /// `results` must hold exactly one result per unique text; slots of any
    /// text left without a result stay `None`.
    pub(crate) fn fan_out(
        self,
        results: Vec<EmbeddingResult>,
        slots: &mut [Option<EmbeddingResult>],
    ) {
        debug_assert_eq!(results.len(), self.unique.len());
        for (result, targets) in results.into_iter().zip(self.positions) {
            for &i in &targets {
                slots[i] = Some(result.clone());
            }
        }
    }
}
