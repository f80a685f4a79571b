use std::iter;
use std::ops::Div;
use num_traits::NumAssign;


/// Arithmetic mean, `None` for an empty slice.
pub fn mean<T, I>(xs: I) -> Option<T>
where T: NumAssign + Copy + Div<f64, Output=T> + iter::Sum<T>,
      I: AsRef<[T]>,
{
    let xs = xs.as_ref();
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().cloned().sum::<T>() / xs.len() as f64)
}


/// Perform cumulative sum starting from `init`.
///
/// The first element of the result is `init + xs[0]`, similar to `numpy.cumsum` with an offset.
pub fn cumsum<'a, T, I, R>(init: T, xs: I) -> R
where T: NumAssign + Copy + 'a,
      I: Iterator<Item=&'a T>,
      R: FromIterator<T>
{
    xs.scan(init, |acc, &x| {
            *acc += x;
            Some(*acc)
        })
        .collect()
}
