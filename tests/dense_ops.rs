//! Integration tests for the dense matrix façade

use approx::assert_relative_eq;
use blockmat::prelude::*;

fn dense(data: &[f64], nrow: usize, ncol: usize, layout: Layout) -> DenseMatrix {
    DenseMatrix::from_slice(data, nrow, ncol, layout).unwrap()
}

#[test]
fn test_constant_fill_columns() {
    let m = create_matrix(3, 2, Layout::Col, Scalar::new(7.0f64)).unwrap();
    assert_eq!(m.get_col(0).unwrap().to_f64_vec(), vec![7.0, 7.0, 7.0]);
    assert_eq!(m.get_col(1).unwrap().to_f64_vec(), vec![7.0, 7.0, 7.0]);
}

#[test]
fn test_multiply_square() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let b = dense(&[5.0, 6.0, 7.0, 8.0], 2, 2, Layout::Row);
    let c = a.multiply(&b, None).unwrap();
    assert_eq!(c.to_f64_vec().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_multiply_tall_is_lazy() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, Layout::Row);
    let b = dense(&[1.0, 0.0, 0.0, 1.0], 2, 2, Layout::Row);
    let c = a.multiply(&b, None).unwrap();
    assert!(c.is_virtual());
    assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_multiply_rectangular() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
    let b = dense(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0], 3, 2, Layout::Row);
    let c = a.multiply(&b, None).unwrap();
    assert_eq!(c.num_rows(), 2);
    assert_eq!(c.num_cols(), 2);
    assert_eq!(c.to_f64_vec().unwrap(), vec![14.0, 32.0, 32.0, 77.0]);
}

#[test]
fn test_multiply_int_matrices() {
    let a = DenseMatrix::from_slice(&[1i32, 2, 3, 4], 2, 2, Layout::Row).unwrap();
    let b = DenseMatrix::from_slice(&[5i32, 6, 7, 8], 2, 2, Layout::Row).unwrap();
    let c = a.multiply(&b, None).unwrap();
    assert_eq!(c.dtype(), DType::I32);
    assert_eq!(c.to_f64_vec().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_inner_prod_shape_mismatch() {
    let a = dense(&[1.0, 2.0], 1, 2, Layout::Row);
    let b = dense(&[1.0, 2.0], 1, 2, Layout::Row);
    assert!(matches!(
        a.multiply(&b, None),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_inner_prod_rejects_incompatible_operator() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let b = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    // The left operator expects i32 operands, the matrices hold f64.
    let left = BulkOperate::same(DType::I32, BinaryOp::Mul);
    let right = BulkOperate::same(DType::I32, BinaryOp::Add);
    assert!(matches!(
        a.inner_prod(&b, left, right, None),
        Err(Error::IncompatibleOperator { .. })
    ));
}

#[test]
fn test_generalized_inner_prod_min_plus() {
    // Tropical-style product: multiply is ADD, accumulate is MIN.
    let a = dense(&[1.0, 4.0, 2.0, 1.0], 2, 2, Layout::Row);
    let b = dense(&[0.0, 2.0, 3.0, 1.0], 2, 2, Layout::Row);
    let left = BulkOperate::same(DType::F64, BinaryOp::Add);
    let right = BulkOperate::same(DType::F64, BinaryOp::Min);
    let c = a.inner_prod(&b, left, right, None).unwrap();
    // c[0][0] = min(1+0, 4+3) = 1; c[0][1] = min(1+2, 4+1) = 3
    // c[1][0] = min(2+0, 1+3) = 2; c[1][1] = min(2+2, 1+1) = 2
    assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 3.0, 2.0, 2.0]);
}

#[test]
fn test_mapply2_add() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let b = dense(&[10.0, 20.0, 30.0, 40.0], 2, 2, Layout::Row);
    let c = a
        .mapply2(&b, BulkOperate::same(DType::F64, BinaryOp::Add))
        .unwrap();
    assert!(c.is_virtual());
    assert_eq!(c.to_f64_vec().unwrap(), vec![11.0, 22.0, 33.0, 44.0]);
}

#[test]
fn test_mapply2_layout_independence() {
    // Same logical matrix in both layouts.
    let a_row = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let a_col = dense(&[1.0, 3.0, 2.0, 4.0], 2, 2, Layout::Col);
    let x = dense(&[5.0, 6.0, 7.0, 8.0], 2, 2, Layout::Row);
    let op = BulkOperate::same(DType::F64, BinaryOp::Mul);
    let r1 = a_row.mapply2(&x, op).unwrap().to_f64_vec().unwrap();
    let r2 = a_col.mapply2(&x, op).unwrap().to_f64_vec().unwrap();
    assert_eq!(r1, r2);
}

#[test]
fn test_mapply2_promotes_mixed_dtypes() {
    let a = DenseMatrix::from_slice(&[1i32, 2, 3, 4], 2, 2, Layout::Row).unwrap();
    let b = dense(&[0.5, 0.5, 0.5, 0.5], 2, 2, Layout::Row);
    let op = BulkOperate::new(DType::I32, DType::F64, BinaryOp::Mul);
    let c = a.mapply2(&b, op).unwrap();
    assert_eq!(c.dtype(), DType::F64);
    assert_eq!(c.to_f64_vec().unwrap(), vec![0.5, 1.0, 1.5, 2.0]);
}

#[test]
fn test_sapply_sqrt() {
    let a = dense(&[1.0, 4.0, 9.0, 16.0], 2, 2, Layout::Row);
    let c = a.sapply(BulkUnary::new(DType::F64, UnaryOp::Sqrt)).unwrap();
    assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_mapply_rows_and_cols() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
    let row_vec = Vector::from_slice(&[10.0f64, 100.0, 1000.0]).unwrap();
    let scaled = a
        .mapply_rows(&row_vec, BulkOperate::same(DType::F64, BinaryOp::Mul))
        .unwrap();
    assert_eq!(
        scaled.to_f64_vec().unwrap(),
        vec![10.0, 200.0, 3000.0, 40.0, 500.0, 6000.0]
    );

    let col_vec = Vector::from_slice(&[1.0f64, -1.0]).unwrap();
    let signed = a
        .mapply_cols(&col_vec, BulkOperate::same(DType::F64, BinaryOp::Mul))
        .unwrap();
    assert_eq!(
        signed.to_f64_vec().unwrap(),
        vec![1.0, 2.0, 3.0, -4.0, -5.0, -6.0]
    );
}

#[test]
fn test_mapply_rows_length_mismatch() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let v = Vector::from_slice(&[1.0f64, 2.0, 3.0]).unwrap();
    assert!(a
        .mapply_rows(&v, BulkOperate::same(DType::F64, BinaryOp::Add))
        .is_err());
}

#[test]
fn test_transpose_involution() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
    let tt = a.transpose().transpose();
    assert_eq!(tt.num_rows(), 2);
    assert_eq!(tt.num_cols(), 3);
    assert_eq!(tt.to_f64_vec().unwrap(), a.to_f64_vec().unwrap());
}

#[test]
fn test_transpose_then_slice() {
    let m = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
    let col = m.transpose().get_col(0).unwrap();
    assert_eq!(col.to_f64_vec(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_get_cols_requires_order() {
    let m = dense(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0], 2, 3, Layout::Col);
    let sliced = m.get_cols(&[0, 2]).unwrap();
    assert_eq!(sliced.to_f64_vec().unwrap(), vec![1.0, 3.0, 4.0, 6.0]);
    assert!(matches!(m.get_cols(&[2, 0]), Err(Error::IndexOrder)));
    assert!(matches!(m.get_cols(&[1, 1]), Err(Error::IndexOrder)));
    assert!(matches!(
        m.get_cols(&[0, 7]),
        Err(Error::IndexOutOfRange { .. })
    ));
}

#[test]
fn test_get_rows() {
    let m = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, Layout::Row);
    let sliced = m.get_rows(&[0, 2]).unwrap();
    assert_eq!(sliced.to_f64_vec().unwrap(), vec![1.0, 2.0, 5.0, 6.0]);
}

#[test]
fn test_aggregate_and_sum() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    assert_eq!(a.sum().unwrap().to_f64(), 10.0);
    let max = a
        .aggregate(BulkOperate::same(DType::F64, BinaryOp::Max))
        .unwrap();
    assert_eq!(max.to_f64(), 4.0);
}

#[test]
fn test_norm2() {
    let a = dense(&[3.0, 4.0], 1, 2, Layout::Row);
    assert_relative_eq!(a.norm2().unwrap(), 5.0, max_relative = 1e-12);
}

#[test]
fn test_conv2_preserves_order() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
    // Column-major reshape: source order 1,4,2,5,3,6.
    let r = a.conv2(3, 2, false).unwrap();
    assert_eq!(r.to_f64_vec().unwrap(), vec![1.0, 5.0, 4.0, 3.0, 2.0, 6.0]);
    // Row-major reshape keeps reading order 1..6.
    let r = a.conv2(3, 2, true).unwrap();
    assert_eq!(r.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert!(a.conv2(4, 2, false).is_err());
}

#[test]
fn test_materialize_idempotent() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, Layout::Row);
    let b = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let mut c = a.multiply(&b, None).unwrap();
    assert!(c.is_virtual());
    let before = c.to_f64_vec().unwrap();
    c.materialize_self().unwrap();
    assert!(!c.is_virtual());
    c.materialize_self().unwrap();
    assert_eq!(c.to_f64_vec().unwrap(), before);
}

#[test]
fn test_multiply_matches_inner_prod() {
    let a = DenseMatrix::random(8, 3, Layout::Row, DType::F64, -1.0, 1.0, 7).unwrap();
    let b = DenseMatrix::random(3, 4, Layout::Row, DType::F64, -1.0, 1.0, 11).unwrap();
    let left = BulkOperate::same(DType::F64, BinaryOp::Mul);
    let right = BulkOperate::same(DType::F64, BinaryOp::Add);
    let m = a.multiply(&b, None).unwrap().to_f64_vec().unwrap();
    let ip = a
        .inner_prod(&b, left, right, None)
        .unwrap()
        .to_f64_vec()
        .unwrap();
    for (x, y) in m.iter().zip(&ip) {
        assert_relative_eq!(*x, *y, epsilon = 1e-12, max_relative = 1e-12);
    }
}

#[test]
fn test_assign_rebinds() {
    let a = dense(&[1.0, 2.0], 1, 2, Layout::Row);
    let b = dense(&[9.0, 9.0], 1, 2, Layout::Row);
    let mut c = a.clone();
    c.assign(&b);
    assert_eq!(c.to_f64_vec().unwrap(), vec![9.0, 9.0]);
    // The original is untouched.
    assert_eq!(a.to_f64_vec().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_apply_row_sums() {
    struct RowSum;
    impl blockmat::matrix::ArrApply for RowSum {
        fn output_dtype(&self) -> DType {
            DType::F64
        }
        fn num_out_elems(&self, _in_len: usize) -> usize {
            1
        }
        fn run(&self, input: &[u8], out: &mut [u8]) {
            let vals: &[f64] = bytemuck::cast_slice(input);
            let sum: f64 = vals.iter().sum();
            out.copy_from_slice(&sum.to_ne_bytes());
        }
    }
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, Layout::Row);
    let sums = a.apply(Margin::Row, &RowSum).unwrap();
    assert_eq!(sums.num_rows(), 2);
    assert_eq!(sums.num_cols(), 1);
    assert_eq!(sums.to_f64_vec().unwrap(), vec![6.0, 15.0]);
    let col_sums = a.apply(Margin::Col, &RowSum).unwrap();
    assert_eq!(col_sums.to_f64_vec().unwrap(), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_one_val_store_arithmetic() {
    let ones = DenseMatrix::constant(2, 2, Layout::Row, Scalar::new(1.0f64));
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let c = a
        .mapply2(&ones, BulkOperate::same(DType::F64, BinaryOp::Add))
        .unwrap();
    assert_eq!(c.to_f64_vec().unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_random_respects_bounds() {
    let m = DenseMatrix::random(16, 4, Layout::Row, DType::F64, 2.0, 3.0, 99).unwrap();
    for v in m.to_f64_vec().unwrap() {
        assert!((2.0..3.0).contains(&v));
    }
}
