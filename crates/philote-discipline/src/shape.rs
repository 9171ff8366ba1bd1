// Shape of a Jacobian block d(f)/d(x) from the shapes of f and x.
//
//   f = [1], x = [1]  → [1]
//   f = [1], x = S    → S
//   f = S,   x = [1]  → S
//   f = S,   x = T    → S ++ T   (dense block, output dimensions first)

/// True for the scalar shape `[1]`.
pub fn is_scalar(shape: &[usize]) -> bool {
    shape == [1]
}

pub fn combine_partial_shape(shape_f: &[usize], shape_x: &[usize]) -> Vec<usize> {
    match (is_scalar(shape_f), is_scalar(shape_x)) {
        (true, true) => vec![1],
        (true, false) => shape_x.to_vec(),
        (false, true) => shape_f.to_vec(),
        (false, false) => shape_f.iter().chain(shape_x).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_scalar() {
        assert_eq!(combine_partial_shape(&[1], &[1]), vec![1]);
    }

    #[test]
    fn scalar_output_takes_input_shape() {
        assert_eq!(combine_partial_shape(&[1], &[3, 2]), vec![3, 2]);
    }

    #[test]
    fn scalar_input_takes_output_shape() {
        assert_eq!(combine_partial_shape(&[4], &[1]), vec![4]);
    }

    #[test]
    fn vector_vector_concatenates_output_first() {
        assert_eq!(combine_partial_shape(&[2, 3], &[5]), vec![2, 3, 5]);
        assert_eq!(combine_partial_shape(&[5], &[2, 3]), vec![5, 2, 3]);
    }

    #[test]
    fn one_element_higher_rank_is_not_scalar() {
        assert!(!is_scalar(&[1, 1]));
        assert_eq!(combine_partial_shape(&[1, 1], &[2]), vec![1, 1, 2]);
    }
}
