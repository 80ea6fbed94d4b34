//! Integration tests for the block matrix façade

use blockmat::prelude::*;
use std::sync::Arc;

/// Cut a row-major f64 matrix into a block group of the given block size.
fn block_from_rows(data: &[f64], nrow: usize, ncol: usize, block_size: usize) -> BlockMatrix {
    let tall = nrow > ncol;
    let mut members: Vec<Arc<dyn MatrixStore>> = Vec::new();
    if tall {
        // Column blocks, column-major members.
        let mut c = 0;
        while c < ncol {
            let w = block_size.min(ncol - c);
            let mut vals = Vec::with_capacity(nrow * w);
            for j in c..c + w {
                for i in 0..nrow {
                    vals.push(data[i * ncol + j]);
                }
            }
            members.push(MemStore::from_slice(&vals, nrow, w, Layout::Col).unwrap() as _);
            c += w;
        }
        BlockMatrix::from_store(CombinedStore::new(members, Layout::Col).unwrap()).unwrap()
    } else {
        // Row blocks, row-major members.
        let mut r = 0;
        while r < nrow {
            let h = block_size.min(nrow - r);
            let vals = &data[r * ncol..(r + h) * ncol];
            members.push(MemStore::from_slice(vals, h, ncol, Layout::Row).unwrap() as _);
            r += h;
        }
        BlockMatrix::from_store(CombinedStore::new(members, Layout::Row).unwrap()).unwrap()
    }
}

#[test]
fn test_block_multiply_matches_dense() {
    let a_data = [1.0, 2.0, 3.0, 4.0];
    let b = DenseMatrix::from_slice(&[5.0, 6.0, 7.0, 8.0], 2, 2, Layout::Row).unwrap();
    let blocked = block_from_rows(&a_data, 2, 2, 1);
    assert_eq!(blocked.num_blocks(), 2);
    let c = blocked.multiply(&b, None).unwrap();
    assert_eq!(c.to_f64_vec().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_block_size_transparency() {
    // The same product through different block sizes is elementwise equal.
    let a_data: Vec<f64> = (0..24).map(|i| (i as f64) * 0.5 - 3.0).collect();
    let b = DenseMatrix::from_slice(
        &[1.0, -1.0, 0.5, 2.0, 0.0, 1.0, -0.5, 1.5, 1.0, 0.0, 2.0, -1.0],
        4,
        3,
        Layout::Row,
    )
    .unwrap();
    let dense = DenseMatrix::from_slice(&a_data, 6, 4, Layout::Row).unwrap();
    let expected = dense.multiply(&b, None).unwrap().to_f64_vec().unwrap();

    for bs in [1, 2, 3] {
        let blocked = block_from_rows(&a_data, 6, 4, bs);
        let got = blocked.multiply(&b, None).unwrap().to_f64_vec().unwrap();
        assert_eq!(got, expected, "block size {bs}");
    }
}

#[test]
fn test_block_wide_multiply() {
    // 2x6 wide group times 6x2: every left block fills its own row strip.
    let a_data: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    let b_data: Vec<f64> = (1..=12).map(|i| (13 - i) as f64).collect();
    let b = DenseMatrix::from_slice(&b_data, 6, 2, Layout::Row).unwrap();
    let dense = DenseMatrix::from_slice(&a_data, 2, 6, Layout::Row).unwrap();
    let expected = dense.multiply(&b, None).unwrap().to_f64_vec().unwrap();

    let blocked = block_from_rows(&a_data, 2, 6, 1);
    assert_eq!(blocked.num_blocks(), 2);
    let got = blocked.multiply(&b, None).unwrap().to_f64_vec().unwrap();
    assert_eq!(got, expected);
}

#[test]
fn test_block_multiply_swaps_to_keep_big_left() {
    // The right operand is longer, so the computation is transposed.
    let a_data = [1.0, 2.0, 3.0, 4.0];
    let blocked = block_from_rows(&a_data, 2, 2, 1);
    let b = DenseMatrix::from_slice(
        &(1..=8).map(|i| i as f64).collect::<Vec<_>>(),
        2,
        4,
        Layout::Row,
    )
    .unwrap();
    let dense = DenseMatrix::from_slice(&a_data, 2, 2, Layout::Row).unwrap();
    let expected = dense.multiply(&b, None).unwrap().to_f64_vec().unwrap();
    let got = blocked.multiply(&b, None).unwrap().to_f64_vec().unwrap();
    assert_eq!(got, expected);
}

#[test]
fn test_block_int_multiply_uses_generic_path() {
    let a = BlockMatrix::new(4, 2, 1, DType::I32, &ConstFill::new(Scalar::new(2i32))).unwrap();
    let b = DenseMatrix::from_slice(&[1i32, 2, 3, 4], 2, 2, Layout::Row).unwrap();
    let c = a.multiply(&b, None).unwrap();
    assert_eq!(c.dtype(), DType::I32);
    // Every row of a is [2, 2], so every result row is [8, 12].
    assert_eq!(
        c.to_f64_vec().unwrap(),
        vec![8.0, 12.0, 8.0, 12.0, 8.0, 12.0, 8.0, 12.0]
    );
}

#[test]
fn test_block_transpose_keeps_partition() {
    let a_data: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    let blocked = block_from_rows(&a_data, 6, 2, 1);
    assert!(!blocked.is_wide());
    let t = blocked.transpose();
    assert!(t.is_wide());
    assert_eq!(t.num_blocks(), blocked.num_blocks());
    assert_eq!(t.block_size(), blocked.block_size());
    assert_eq!(t.num_rows(), 2);
    assert_eq!(t.num_cols(), 6);
    let tt = t.transpose();
    assert_eq!(
        tt.to_dense().to_f64_vec().unwrap(),
        blocked.to_dense().to_f64_vec().unwrap()
    );
}

#[test]
fn test_block_get_col_and_row() {
    let a_data: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    let tall = block_from_rows(&a_data, 6, 2, 1);
    let col = tall.get_col(1).unwrap();
    assert_eq!(col.to_f64_vec(), vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
    assert!(matches!(
        tall.get_row(0),
        Err(Error::OrientationMismatch { .. })
    ));

    let wide = block_from_rows(&a_data, 2, 6, 1);
    let row = wide.get_row(1).unwrap();
    assert_eq!(row.to_f64_vec(), vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    assert!(matches!(
        wide.get_col(0),
        Err(Error::OrientationMismatch { .. })
    ));
}

#[test]
fn test_block_get_cols_groups_by_block() {
    // 4x6 tall? No: 6 cols >= 4 rows makes it wide, so build 6x4 tall.
    let a_data: Vec<f64> = (1..=24).map(|i| i as f64).collect();
    let tall = block_from_rows(&a_data, 6, 4, 2);
    assert_eq!(tall.num_blocks(), 2);
    let sliced = tall.get_cols(&[0, 2, 3]).unwrap();
    assert_eq!(sliced.num_rows(), 6);
    assert_eq!(sliced.num_cols(), 3);
    let expected: Vec<f64> = (0..6)
        .flat_map(|i| [0, 2, 3].map(|j| a_data[i * 4 + j]))
        .collect();
    assert_eq!(sliced.to_f64_vec().unwrap(), expected);
    assert!(matches!(tall.get_cols(&[3, 2]), Err(Error::IndexOrder)));
}

#[test]
fn test_block_mapply_rows_routing() {
    let a_data: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    let op = BulkOperate::same(DType::F64, BinaryOp::Mul);

    // Wide group: the same vector goes to every member.
    let wide = block_from_rows(&a_data, 2, 6, 1);
    let v = Vector::from_slice(&[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let scaled = wide.mapply_rows(&v, op).unwrap();
    let expected: Vec<f64> = (0..2)
        .flat_map(|i| (0..6).map(move |j| a_data_at(i, j) * (j + 1) as f64))
        .collect();
    assert_eq!(scaled.to_dense().to_f64_vec().unwrap(), expected);

    // Tall group: consecutive vector segments go to their members.
    let tall = block_from_rows(&a_data, 6, 2, 1);
    let v = Vector::from_slice(&[10.0f64, 100.0]).unwrap();
    let scaled = tall.mapply_rows(&v, op).unwrap();
    let expected: Vec<f64> = (0..6)
        .flat_map(|i| [(i * 2 + 1) as f64 * 10.0, (i * 2 + 2) as f64 * 100.0])
        .collect();
    assert_eq!(scaled.to_dense().to_f64_vec().unwrap(), expected);
}

fn a_data_at(i: usize, j: usize) -> f64 {
    (i * 6 + j + 1) as f64
}

#[test]
fn test_block_mapply2_requires_same_block_size() {
    let a_data: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    let a = block_from_rows(&a_data, 6, 2, 1);
    let b = block_from_rows(&a_data, 6, 2, 2);
    let op = BulkOperate::same(DType::F64, BinaryOp::Add);
    assert!(a.mapply2(&b, op).is_err());

    let c = block_from_rows(&a_data, 6, 2, 1);
    let summed = a.mapply2(&c, op).unwrap();
    let expected: Vec<f64> = (1..=12).map(|i| (i * 2) as f64).collect();
    assert_eq!(summed.to_dense().to_f64_vec().unwrap(), expected);
}

#[test]
fn test_block_sapply_and_materialize() {
    let a_data: Vec<f64> = (1..=12).map(|i| (i * i) as f64).collect();
    let blocked = block_from_rows(&a_data, 6, 2, 1);
    let mut rooted = blocked.sapply(BulkUnary::new(DType::F64, UnaryOp::Sqrt)).unwrap();
    assert!(rooted.is_virtual());
    rooted.materialize_self().unwrap();
    assert!(!rooted.is_virtual());
    let expected: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    assert_eq!(rooted.to_dense().to_f64_vec().unwrap(), expected);
}

#[test]
fn test_block_new_initializes_with_global_coords() {
    // A one-column tall block matrix built from the sequence initializer.
    let m = BlockMatrix::new(8, 1, 1, DType::F64, &SeqInit::new(DType::F64, 0.0, 1.0)).unwrap();
    assert_eq!(m.num_blocks(), 1);
    let col = m.get_col(0).unwrap();
    assert_eq!(col.to_f64_vec(), (0..8).map(|i| i as f64).collect::<Vec<_>>());
}

#[test]
fn test_block_aggregate() {
    let a_data: Vec<f64> = (1..=12).map(|i| i as f64).collect();
    let blocked = block_from_rows(&a_data, 6, 2, 1);
    assert_eq!(
        blocked
            .aggregate(BulkOperate::same(DType::F64, BinaryOp::Add))
            .unwrap()
            .to_f64(),
        78.0
    );
}
