use crate::models::{StudentId, StudentRecord, Subject};

pub const TOP_STUDENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandScheme {
    #[default]
    FourBand,
    FiveBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Band {
    Excellent,
    Good,
    Average,
    BelowAverage,
    Weak,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::Excellent => "excellent",
            Band::Good => "good",
            Band::Average => "average",
            Band::BelowAverage => "below average",
            Band::Weak => "weak",
        }
    }
}

impl BandScheme {
    pub fn bands(self) -> &'static [Band] {
        match self {
            BandScheme::FourBand => &[Band::Excellent, Band::Good, Band::Average, Band::Weak],
            BandScheme::FiveBand => &[
                Band::Excellent,
                Band::Good,
                Band::Average,
                Band::BelowAverage,
                Band::Weak,
            ],
        }
    }

    pub fn classify(self, average: f64) -> Band {
        match self {
            BandScheme::FourBand => match average {
                a if a >= 8.0 => Band::Excellent,
                a if a >= 6.5 => Band::Good,
                a if a >= 5.0 => Band::Average,
                _ => Band::Weak,
            },
            BandScheme::FiveBand => match average {
                a if a >= 8.0 => Band::Excellent,
                a if a >= 6.5 => Band::Good,
                a if a >= 5.5 => Band::Average,
                a if a >= 4.0 => Band::BelowAverage,
                _ => Band::Weak,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandCount {
    pub band: Band,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsSummary {
    pub total_students: usize,
    pub avg_math_score: Option<f64>,
    pub avg_literature_score: Option<f64>,
    pub avg_english_score: Option<f64>,
    pub avg_overall_score: Option<f64>,
    pub distribution: Vec<BandCount>,
    /// Records without any score; they sit outside every band.
    pub unscored: usize,
}

impl AnalyticsSummary {
    pub fn subject_average(&self, subject: Subject) -> Option<f64> {
        match subject {
            Subject::Math => self.avg_math_score,
            Subject::Literature => self.avg_literature_score,
            Subject::English => self.avg_english_score,
        }
    }

    pub fn count(&self, band: Band) -> usize {
        self.distribution
            .iter()
            .find(|entry| entry.band == band)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Analytics {
    NoData,
    Summary(AnalyticsSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedStudent {
    pub id: StudentId,
    pub name: String,
    pub average: f64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Default)]
struct Tally {
    sum: f64,
    count: usize,
}

impl Tally {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(round2(self.sum / self.count as f64))
        }
    }
}

/// One pass over the collection. An empty collection is `NoData`.
pub fn summarize(records: &[StudentRecord], scheme: BandScheme) -> Analytics {
    if records.is_empty() {
        return Analytics::NoData;
    }

    let mut subjects: [Tally; 3] = Default::default();
    let mut overall = Tally::default();
    let mut band_counts = vec![0usize; scheme.bands().len()];
    let mut unscored = 0usize;

    for record in records {
        for (index, subject) in Subject::ALL.iter().enumerate() {
            if let Some(score) = record.score(*subject) {
                subjects[index].add(score);
                overall.add(score);
            }
        }

        match record.average_score() {
            Some(average) => {
                let band = scheme.classify(average);
                if let Some(slot) = scheme.bands().iter().position(|candidate| *candidate == band) {
                    band_counts[slot] += 1;
                }
            }
            None => unscored += 1,
        }
    }

    let distribution = scheme
        .bands()
        .iter()
        .zip(band_counts)
        .map(|(band, count)| BandCount { band: *band, count })
        .collect();

    Analytics::Summary(AnalyticsSummary {
        total_students: records.len(),
        avg_math_score: subjects[0].mean(),
        avg_literature_score: subjects[1].mean(),
        avg_english_score: subjects[2].mean(),
        avg_overall_score: overall.mean(),
        distribution,
        unscored,
    })
}

/// Highest averages first; equal averages keep collection order.
/// Records without any score are left out.
pub fn top_students(records: &[StudentRecord], limit: usize) -> Vec<RankedStudent> {
    let mut ranked: Vec<RankedStudent> = records
        .iter()
        .filter_map(|record| {
            record.average_score().map(|average| RankedStudent {
                id: record.id.clone(),
                name: record.full_name(),
                average,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.average.partial_cmp(&a.average).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}
