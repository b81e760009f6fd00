//! Tests for BoundingBox operations.

use cube_common::BoundingBox;

// ============================================================================
// Constructor tests
// ============================================================================

#[test]
fn test_bbox_new() {
    let bbox = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
    assert_eq!(bbox.min_x, -180.0);
    assert_eq!(bbox.min_y, -90.0);
    assert_eq!(bbox.max_x, 180.0);
    assert_eq!(bbox.max_y, 90.0);
}

#[test]
fn test_bbox_copy() {
    let bbox1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let bbox2 = bbox1;
    assert_eq!(bbox1, bbox2);
}

// ============================================================================
// Dimension tests
// ============================================================================

#[test]
fn test_width_height_center() {
    let bbox = BoundingBox::new(140.0, -40.0, 150.0, -30.0);
    assert_eq!(bbox.width(), 10.0);
    assert_eq!(bbox.height(), 10.0);
    assert_eq!(bbox.center(), (145.0, -35.0));
}

#[test]
fn test_buffered() {
    let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).buffered(0.5);
    assert_eq!(bbox, BoundingBox::new(-0.5, -0.5, 1.5, 1.5));
}

// ============================================================================
// Set operations
// ============================================================================

#[test]
fn test_union() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(5.0, -2.0, 6.0, 0.5);
    assert_eq!(a.union(&b), BoundingBox::new(0.0, -2.0, 6.0, 1.0));
}

#[test]
fn test_intersection_disjoint_is_none() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(2.0, 2.0, 3.0, 3.0);
    assert!(a.intersection(&b).is_none());
}

#[test]
fn test_intersection_contained() {
    let outer = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
    let inner = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
    assert_eq!(outer.intersection(&inner), Some(inner));
}

#[test]
fn test_contains_point_on_edge() {
    let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    assert!(bbox.contains_point(0.0, 5.0));
    assert!(bbox.contains_point(10.0, 10.0));
    assert!(!bbox.contains_point(10.0001, 5.0));
}
