//! Integration tests for lazy evaluation and the portion scheduler

use blockmat::prelude::*;
use blockmat::scheduler;
use std::sync::Arc;

fn dense(data: &[f64], nrow: usize, ncol: usize, layout: Layout) -> DenseMatrix {
    DenseMatrix::from_slice(data, nrow, ncol, layout).unwrap()
}

#[test]
fn test_operator_tree_evaluates_hierarchically() {
    // (a + b) * c stays a tree of virtual stores until it is read.
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let b = dense(&[10.0, 10.0, 10.0, 10.0], 2, 2, Layout::Row);
    let c = dense(&[2.0, 2.0, 2.0, 2.0], 2, 2, Layout::Row);
    let add = BulkOperate::same(DType::F64, BinaryOp::Add);
    let mul = BulkOperate::same(DType::F64, BinaryOp::Mul);

    let tree = a.mapply2(&b, add).unwrap().mapply2(&c, mul).unwrap();
    assert!(tree.is_virtual());
    assert_eq!(tree.to_f64_vec().unwrap(), vec![22.0, 24.0, 26.0, 28.0]);
}

#[test]
fn test_full_level_memoizes() {
    let a = dense(&[4.0, 9.0, 16.0, 25.0], 2, 2, Layout::Row);
    let lazy = a.sapply(BulkUnary::new(DType::F64, UnaryOp::Sqrt)).unwrap();
    lazy.set_materialize_level(MaterializeLevel::Full);
    // The first portion read materializes the whole result; later reads
    // serve from the memoized store.
    assert_eq!(lazy.get_f64(0, 0).unwrap(), 2.0);
    assert_eq!(lazy.get_f64(1, 1).unwrap(), 5.0);
}

#[test]
fn test_co_materialize_passthrough_and_order() {
    let a = dense(&[1.0, 2.0], 1, 2, Layout::Row);
    let lazy = a
        .sapply(BulkUnary::new(DType::F64, UnaryOp::Neg))
        .unwrap();
    let stores = vec![Arc::clone(a.store()), Arc::clone(lazy.store())];
    let outs = scheduler::co_materialize(&stores, true).unwrap();
    assert_eq!(outs.len(), 2);
    // Concrete stores pass through untouched.
    assert!(Arc::ptr_eq(&outs[0], &stores[0]));
    assert!(!outs[1].is_virtual());
    let m = DenseMatrix::from_store(Arc::clone(&outs[1]));
    assert_eq!(m.to_f64_vec().unwrap(), vec![-1.0, -2.0]);
}

#[test]
fn test_numa_matrix_end_to_end() {
    let init = ConstFill::new(Scalar::new(1.0f64));
    let a = DenseMatrix::new_numa(64, 2, Layout::Row, &init, NumaTopology::new(4)).unwrap();
    assert_eq!(a.sum().unwrap().to_f64(), 128.0);

    let b = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let c = a.multiply(&b, None).unwrap();
    let vals = c.to_f64_vec().unwrap();
    // Every output row is [1+3, 2+4].
    assert_eq!(vals.len(), 128);
    for row in vals.chunks(2) {
        assert_eq!(row, [4.0, 6.0]);
    }
}

#[test]
fn test_numa_transpose_round_trip() {
    let init = ConstFill::new(Scalar::new(2.5f64));
    let a = DenseMatrix::new_numa(16, 3, Layout::Row, &init, NumaTopology::new(2)).unwrap();
    let tt = a.transpose().transpose();
    assert_eq!(tt.num_rows(), 16);
    assert_eq!(tt.to_f64_vec().unwrap(), a.to_f64_vec().unwrap());
}

#[test]
fn test_lazy_transpose_of_virtual_store() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, Layout::Row);
    let b = dense(&[1.0, 0.0, 0.0, 1.0], 2, 2, Layout::Row);
    let product = a.multiply(&b, None).unwrap();
    let t = product.transpose();
    assert!(t.is_virtual());
    assert_eq!(t.num_rows(), 2);
    assert_eq!(t.num_cols(), 3);
    assert_eq!(t.to_f64_vec().unwrap(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
}

#[test]
fn test_materialized_store_replaces_facade_store() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let mut lazy = a
        .mapply2(&a, BulkOperate::same(DType::F64, BinaryOp::Add))
        .unwrap();
    let before = Arc::as_ptr(lazy.store()) as *const ();
    lazy.materialize_self().unwrap();
    let after = Arc::as_ptr(lazy.store()) as *const ();
    assert_ne!(before, after);
    assert!(!lazy.is_virtual());
    assert_eq!(lazy.to_f64_vec().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_aggregate_over_virtual_store() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let doubled = a
        .mapply2(&a, BulkOperate::same(DType::F64, BinaryOp::Add))
        .unwrap();
    assert_eq!(doubled.sum().unwrap().to_f64(), 20.0);
}

#[test]
fn test_mixed_layout_operands_in_tree() {
    let a = dense(&[1.0, 2.0, 3.0, 4.0], 2, 2, Layout::Row);
    let b = dense(&[1.0, 3.0, 2.0, 4.0], 2, 2, Layout::Col);
    let op = BulkOperate::same(DType::F64, BinaryOp::Sub);
    let diff = a.mapply2(&b, op).unwrap();
    assert_eq!(diff.to_f64_vec().unwrap(), vec![0.0, 0.0, 0.0, 0.0]);
}
