use std::f64::consts::PI;

use ndarray::{Array1, Array2};

/// Generate the Vandermonde matrix of `degree` for observations `x`
///
/// The Vandermonde matrix is a (n x degree + 1) matrix. Each row of the matrix is a geometric
/// progression for an individual observation `x` from power `0` to `degree` inclusive, so that
/// left-multiplying a vector of polynomial coefficients evaluates the polynomial at every
/// observation.
///
/// # Examples
///
/// ```
/// use ruby_pressure::math::vandermonde;
/// use ndarray::{arr1, arr2};
///
/// let observations = arr1(&[2., 3.]);
/// let vander = vandermonde(&observations, 2);
///
/// let expected = arr2(&[[1., 2., 4.], [1., 3., 9.]]);
/// assert_eq!(vander, expected);
/// ```
#[must_use]
pub fn vandermonde(x: &Array1<f64>, degree: usize) -> Array2<f64> {
    let mut matrix = Array2::ones((x.len(), degree + 1));
    for (mut row, xi) in matrix.rows_mut().into_iter().zip(x) {
        for jj in 1..=degree {
            row[jj] = row[jj - 1] * xi;
        }
    }
    matrix
}

/// Evaluate the polynomial with `coefficients` (lowest order first) at `x`
///
/// # Examples
///
/// ```
/// use ruby_pressure::math::polynomial;
///
/// assert_eq!(polynomial(2., &[1., 0., 3.]), 13.);
/// ```
#[must_use]
pub fn polynomial(x: f64, coefficients: &[f64]) -> f64 {
    coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, coefficient| acc.mul_add(x, *coefficient))
}

/// Sample `points` values of the Ricker (Mexican hat) wavelet of `width`, centred in the window
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn ricker(points: usize, width: f64) -> Array1<f64> {
    let amplitude = 2. / ((3. * width).sqrt() * PI.powf(0.25));
    let centre = (points as f64 - 1.) / 2.;
    let wsq = width.powi(2);
    Array1::from_shape_fn(points, |ii| {
        let xsq = (ii as f64 - centre).powi(2);
        amplitude * (1. - xsq / wsq) * (-xsq / (2. * wsq)).exp()
    })
}

/// Convolve `data` with `kernel`, returning the central part with the length of `data`
///
/// Samples beyond either end of `data` are taken as zero.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn convolve_same(data: &Array1<f64>, kernel: &Array1<f64>) -> Array1<f64> {
    let n = data.len();
    let offset = (kernel.len().saturating_sub(1) / 2) as isize;
    Array1::from_shape_fn(n, |ii| {
        kernel
            .iter()
            .enumerate()
            .filter_map(|(kk, weight)| {
                let index = ii as isize + offset - kk as isize;
                usize::try_from(index)
                    .ok()
                    .and_then(|index| data.get(index))
                    .map(|value| value * weight)
            })
            .sum()
    })
}

/// The `q`-th percentile (0 to 100) of `values`, interpolating linearly between ranks
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q.clamp(0., 100.) / 100. * (sorted.len() - 1) as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    let fraction = rank - below as f64;
    Some(sorted[below] + (sorted[above] - sorted[below]) * fraction)
}
