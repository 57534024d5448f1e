/// Largest angular distance; also what a zero vector is from anything.
pub const MAX_DISTANCE: f32 = 2.0;

/// Angular distance `1 - cos(a, b)`, in `[0, 2]`.
///
/// Sums run in f64: squared norms of large unnormalized embeddings overflow
/// f32, and near-duplicate faces differ only in the low bits of the cosine.
/// Zero vectors and mismatched lengths sit at [`MAX_DISTANCE`].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return MAX_DISTANCE;
    }

    let mut dot: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return MAX_DISTANCE;
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    (1.0 - similarity) as f32
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum::<f64>() as f32
}

pub(crate) fn norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| x as f64 * x as f64).sum::<f64>().sqrt()
}
