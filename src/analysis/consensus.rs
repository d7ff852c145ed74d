//! Mode voting across recognition samples

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::analysis::dates::extract_date;
use crate::analysis::document::{classify, extract_document_number, DocumentType};
use crate::config::ConsensusSettings;

/// Fields extracted from one successfully recognized variant
///
/// Only built through [`OcrSample::from_text`], so a present date has always
/// passed the plausibility filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSample {
    date: Option<NaiveDate>,
    document_number: Option<String>,
    /// Engine confidence, 0..=100
    confidence: f32,
    raw_text: String,
    source_variant: usize,
}

impl OcrSample {
    /// Run date and number extraction over recognized text
    pub fn from_text(
        raw_text: String,
        confidence: f32,
        source_variant: usize,
        today: NaiveDate,
        bounds: &ConsensusSettings,
    ) -> Self {
        let date = extract_date(&raw_text, today, bounds);
        let document_number = extract_document_number(&raw_text, date);
        Self {
            date,
            document_number,
            confidence,
            raw_text,
            source_variant,
        }
    }

    /// Plausible birth date, if the text contained one
    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    pub fn document_number(&self) -> Option<&str> {
        self.document_number.as_deref()
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Index of the variant that produced this sample
    pub fn source_variant(&self) -> usize {
        self.source_variant
    }
}

/// The agreed answer across all samples
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    pub birth_date: NaiveDate,
    pub document_number: Option<String>,
    pub document_type: DocumentType,
    /// 0..=1
    pub confidence: f32,
    /// Samples agreeing on `birth_date`
    pub votes: usize,
    /// Dated samples that took part in the vote
    pub sample_count: usize,
    /// Variant whose text supplied the number and type
    pub winning_variant: usize,
}

#[derive(Default)]
struct Tally {
    votes: usize,
    confidence_sum: f32,
    /// Strongest agreeing sample: (confidence, variant, position)
    best: Option<(f32, usize, usize)>,
}

impl Tally {
    fn add(&mut self, sample: &OcrSample, position: usize) {
        self.votes += 1;
        self.confidence_sum += sample.confidence;
        let better = match self.best {
            None => true,
            Some((conf, variant, _)) => {
                sample.confidence > conf || (sample.confidence == conf && sample.source_variant < variant)
            }
        };
        if better {
            self.best = Some((sample.confidence, sample.source_variant, position));
        }
    }

    /// Ordering key: more votes, then higher confidence, then lower variant
    fn rank(&self) -> (usize, f32, std::cmp::Reverse<usize>) {
        let (conf, variant, _) = self.best.unwrap_or((0.0, usize::MAX, 0));
        (self.votes, conf, std::cmp::Reverse(variant))
    }
}

/// Pick the most frequent date; ties go to the highest single confidence
/// among the tied dates, then to the lowest variant index.
///
/// Returns `None` when no sample carries a date.
pub fn resolve(samples: &[OcrSample]) -> Option<Consensus> {
    let dated: Vec<&OcrSample> = samples.iter().filter(|s| s.date.is_some()).collect();
    if dated.is_empty() {
        return None;
    }

    let mut tallies: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    for (position, sample) in dated.iter().enumerate() {
        if let Some(date) = sample.date {
            tallies.entry(date).or_default().add(sample, position);
        }
    }

    let (birth_date, tally) = tallies.into_iter().max_by(|(_, a), (_, b)| {
        let (a_votes, a_conf, a_variant) = a.rank();
        let (b_votes, b_conf, b_variant) = b.rank();
        a_votes
            .cmp(&b_votes)
            .then(a_conf.total_cmp(&b_conf))
            .then(a_variant.cmp(&b_variant))
    })?;

    let (_, _, winner_pos) = tally.best?;
    let winner = dated[winner_pos];
    let mean_confidence = tally.confidence_sum / tally.votes as f32;
    let confidence =
        (tally.votes as f32 / dated.len() as f32 * mean_confidence / 100.0).clamp(0.0, 1.0);

    debug!(
        "Consensus on {} with {}/{} votes, winner variant {}",
        birth_date,
        tally.votes,
        dated.len(),
        winner.source_variant
    );

    Some(Consensus {
        birth_date,
        document_number: extract_document_number(&winner.raw_text, Some(birth_date)),
        document_type: classify(&winner.raw_text),
        confidence,
        votes: tally.votes,
        sample_count: dated.len(),
        winning_variant: winner.source_variant,
    })
}
