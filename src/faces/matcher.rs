/// Nearest-identity matching of face embeddings against the gallery
use super::{FaceMatch, FaceMatches, Gallery};
use crate::embedding::cosine_distance;
use std::collections::BTreeMap;

/// Closest identity whose distance is strictly below `threshold`
///
/// Every reference of every identity is compared. Identities are visited in
/// gallery order and only a strictly smaller distance replaces the current
/// best, so on an exact tie the first-seen identity wins.
pub fn nearest_identity<'a>(
    embedding: &[f32],
    gallery: &'a Gallery,
    threshold: f32,
) -> Option<(&'a str, f32)> {
    let mut best: Option<(&'a str, f32)> = None;

    for identity in gallery.identities() {
        for reference in &identity.reference_embeddings {
            let distance = cosine_distance(reference, embedding);
            if distance >= threshold {
                continue;
            }
            if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                best = Some((identity.name.as_str(), distance));
            }
        }
    }

    best
}

/// Name every face embedding, folding repeated people into one entry with
/// their highest confidence
pub fn match_faces(embeddings: &[Vec<f32>], gallery: &Gallery, threshold: f32) -> FaceMatches {
    let mut best: BTreeMap<String, f32> = BTreeMap::new();
    let mut unknown = 0;

    for embedding in embeddings {
        match nearest_identity(embedding, gallery, threshold) {
            Some((name, distance)) => {
                let confidence = 1.0 - distance;
                let entry = best.entry(name.to_string()).or_insert(confidence);
                if confidence > *entry {
                    *entry = confidence;
                }
            }
            None => unknown += 1,
        }
    }

    FaceMatches {
        matches: best
            .into_iter()
            .map(|(name, confidence)| FaceMatch { name, confidence })
            .collect(),
        unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::Identity;

    fn identity(name: &str, refs: Vec<Vec<f32>>) -> Identity {
        Identity {
            name: name.to_string(),
            reference_files: (0..refs.len()).map(|i| format!("{}.jpg", i)).collect(),
            reference_embeddings: refs,
        }
    }

    #[test]
    fn test_nearest_identity_wins() {
        let gallery = Gallery::new(vec![
            identity("Alice", vec![vec![1.0, 0.0, 0.0]]),
            identity("Bob", vec![vec![0.8, 0.6, 0.0]]),
        ]);

        let (name, distance) = nearest_identity(&[0.9, 0.4, 0.0], &gallery, 0.6).unwrap();
        assert_eq!(name, "Bob");
        assert!(distance < 0.05);
    }

    #[test]
    fn test_any_reference_can_match() {
        let gallery = Gallery::new(vec![identity(
            "Alice",
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )]);
        assert_eq!(nearest_identity(&[0.0, 1.0], &gallery, 0.6).unwrap().0, "Alice");
    }

    #[test]
    fn test_exact_tie_goes_to_first_identity() {
        let gallery = Gallery::new(vec![
            identity("Carol", vec![vec![1.0, 0.0]]),
            identity("Alice", vec![vec![1.0, 0.0]]),
        ]);
        // Gallery orders identities by name
        assert_eq!(nearest_identity(&[1.0, 0.0], &gallery, 0.6).unwrap().0, "Alice");

        let tied = Gallery::from_ordered(vec![
            identity("Carol", vec![vec![1.0, 0.0]]),
            identity("Alice", vec![vec![1.0, 0.0]]),
        ]);
        assert_eq!(nearest_identity(&[1.0, 0.0], &tied, 0.6).unwrap().0, "Carol");
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let gallery = Gallery::new(vec![identity("Alice", vec![vec![1.0, 0.0]])]);
        // Orthogonal vectors sit at distance 1.0
        assert!(nearest_identity(&[0.0, 1.0], &gallery, 1.0).is_none());
        assert!(nearest_identity(&[0.0, 1.0], &gallery, 1.01).is_some());
    }

    #[test]
    fn test_match_faces_counts_unknown_and_dedupes() {
        let gallery = Gallery::new(vec![identity("Alice", vec![vec![1.0, 0.0]])]);
        let faces = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0]];

        let result = match_faces(&faces, &gallery, 0.6);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].name, "Alice");
        assert!((result.matches[0].confidence - 1.0).abs() < 1e-6);
        assert_eq!(result.unknown, 1);
    }

    #[test]
    fn test_empty_gallery_everyone_unknown() {
        let result = match_faces(&[vec![1.0, 0.0]], &Gallery::default(), 0.6);
        assert!(result.matches.is_empty());
        assert_eq!(result.unknown, 1);
    }
}
