//! Representative selection: the member nearest its cluster's centroid.

use chrono::NaiveDateTime;
use std::cmp::Ordering;

use super::distance::{cosine_distance, normalize};

/// Distances closer than this count as a tie.
const TIE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: i64,
    pub path: &'a str,
    pub taken_at: Option<NaiveDateTime>,
    pub embedding: Option<&'a [f32]>,
}

/// Mean of the unit-normalized vectors. `None` when nothing is usable.
pub fn centroid(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    let usable: Vec<Vec<f32>> = vectors
        .iter()
        .filter(|v| v.len() == dim)
        .map(|v| normalize(v))
        .collect();
    if usable.is_empty() || dim == 0 {
        return None;
    }
    let mut mean = vec![0.0f32; dim];
    for v in &usable {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let count = usable.len() as f32;
    mean.iter_mut().for_each(|m| *m /= count);
    Some(mean)
}

/// Pick the member closest to the centroid.
///
/// Ties go to the earliest capture time (unknown times last), then to the
/// lexically smallest path. Members without an embedding only win when no
/// member has one.
pub fn select_representative(members: &[Candidate]) -> Option<i64> {
    let vectors: Vec<&[f32]> = members.iter().filter_map(|m| m.embedding).collect();
    let center = centroid(&vectors).map(|c| normalize(&c));

    let scored: Vec<(f32, &Candidate)> = members
        .iter()
        .map(|m| {
            let distance = match (&center, m.embedding) {
                (Some(c), Some(e)) if e.len() == c.len() => cosine_distance(c, &normalize(e)),
                _ => f32::INFINITY,
            };
            (distance, m)
        })
        .collect();

    scored
        .iter()
        .min_by(|a, b| compare(a, b))
        .map(|(_, m)| m.id)
}

fn compare(a: &(f32, &Candidate), b: &(f32, &Candidate)) -> Ordering {
    let (da, ma) = a;
    let (db, mb) = b;
    let by_distance = if da.is_infinite() || db.is_infinite() || (da - db).abs() > TIE_EPSILON {
        da.total_cmp(db)
    } else {
        Ordering::Equal
    };
    by_distance
        .then_with(|| match (ma.taken_at, mb.taken_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| ma.path.cmp(mb.path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()
    }

    #[test]
    fn test_closest_to_centroid_wins() {
        let a = [1.0, 0.0];
        let b = [0.8, 0.6];
        let c = [0.6, 0.8];
        let members = [
            Candidate { id: 1, path: "/a", taken_at: None, embedding: Some(&a) },
            Candidate { id: 2, path: "/b", taken_at: None, embedding: Some(&b) },
            Candidate { id: 3, path: "/c", taken_at: None, embedding: Some(&c) },
        ];
        assert_eq!(select_representative(&members), Some(2));
    }

    #[test]
    fn test_ties_break_by_time_then_path() {
        let v = [1.0, 0.0];
        let members = [
            Candidate { id: 1, path: "/z", taken_at: ts("2024-01-01 10:00:05"), embedding: Some(&v) },
            Candidate { id: 2, path: "/y", taken_at: ts("2024-01-01 10:00:00"), embedding: Some(&v) },
            Candidate { id: 3, path: "/x", taken_at: None, embedding: Some(&v) },
        ];
        assert_eq!(select_representative(&members), Some(2));

        let members = [
            Candidate { id: 1, path: "/b", taken_at: None, embedding: Some(&v) },
            Candidate { id: 2, path: "/a", taken_at: None, embedding: Some(&v) },
        ];
        assert_eq!(select_representative(&members), Some(2));
    }

    #[test]
    fn test_without_embeddings_falls_back_to_time_and_path() {
        let members = [
            Candidate { id: 7, path: "/b", taken_at: ts("2024-01-01 09:00:00"), embedding: None },
            Candidate { id: 8, path: "/a", taken_at: ts("2024-01-01 09:00:00"), embedding: None },
        ];
        assert_eq!(select_representative(&members), Some(8));
        assert_eq!(select_representative(&[]), None);
    }

    #[test]
    fn test_embedded_member_beats_unembedded() {
        let v = [0.0, 1.0];
        let members = [
            Candidate { id: 1, path: "/a", taken_at: ts("2020-01-01 00:00:00"), embedding: None },
            Candidate { id: 2, path: "/b", taken_at: None, embedding: Some(&v) },
        ];
        assert_eq!(select_representative(&members), Some(2));
    }
}
