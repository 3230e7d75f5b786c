use crate::errors::{OrthoError, Result};
use crate::object_extraction::{CoordinateSpace, ObjectDescriptor};
use crate::raster::RasterWindow;

/// Shift window-local descriptors into raster-global pixel space.
///
/// Every descriptor must still be `Local`; translating a descriptor twice is
/// an error rather than a silent double shift.
pub fn translate_to_global(objects: &mut [ObjectDescriptor], window: &RasterWindow) -> Result<()> {
    let (dr, dc) = (window.offset_row, window.offset_col);

    if let Some(object) = objects.iter().find(|o| o.space != CoordinateSpace::Local) {
        return Err(OrthoError::CoordinateSpace(format!(
            "descriptor at {:?} is already global",
            object.bbox
        )));
    }

    for object in objects.iter_mut() {
        object.bbox.min_row += dr;
        object.bbox.max_row += dr;
        object.bbox.min_col += dc;
        object.bbox.max_col += dc;
        object.centroid = (object.centroid.0 + dr as f64, object.centroid.1 + dc as f64);

        // top/bottom hold columns, left/right hold rows
        object.border.top.iter_mut().for_each(|c| *c += dc);
        object.border.bottom.iter_mut().for_each(|c| *c += dc);
        object.border.left.iter_mut().for_each(|r| *r += dr);
        object.border.right.iter_mut().for_each(|r| *r += dr);

        object.space = CoordinateSpace::Global;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_extraction::{BorderProfile, BoundingBox};
    use assert_approx_eq::assert_approx_eq;

    fn local_object() -> ObjectDescriptor {
        ObjectDescriptor {
            area: 12,
            perimeter: 10.0,
            bbox: BoundingBox { min_row: 1, min_col: 2, max_row: 4, max_col: 6 },
            centroid: (2.5, 3.5),
            circularity: 0.5,
            space: CoordinateSpace::Local,
            border: BorderProfile {
                top: vec![2, 3],
                bottom: vec![],
                left: vec![],
                right: vec![1, 2, 3],
            },
        }
    }

    #[test]
    fn shifts_box_centroid_and_border() {
        let mut objects = vec![local_object()];
        translate_to_global(&mut objects, &RasterWindow::new(100, 250, 50, 50)).unwrap();

        let obj = &objects[0];
        assert_eq!(obj.bbox, BoundingBox { min_row: 101, min_col: 252, max_row: 104, max_col: 256 });
        assert_approx_eq!(obj.centroid.0, 102.5);
        assert_approx_eq!(obj.centroid.1, 253.5);
        assert_eq!(obj.border.top, vec![252, 253]);
        assert_eq!(obj.border.right, vec![101, 102, 103]);
        assert_eq!(obj.space, CoordinateSpace::Global);
        assert_eq!(obj.area, 12);
    }

    #[test]
    fn second_translation_is_rejected() {
        let mut objects = vec![local_object()];
        let window = RasterWindow::new(5, 5, 10, 10);
        translate_to_global(&mut objects, &window).unwrap();
        let err = translate_to_global(&mut objects, &window).unwrap_err();
        assert!(matches!(err, OrthoError::CoordinateSpace(_)));
        assert_eq!(objects[0].bbox.min_row, 6);
    }

    #[test]
    fn zero_offset_only_retags() {
        let mut objects = vec![local_object()];
        translate_to_global(&mut objects, &RasterWindow::new(0, 0, 10, 10)).unwrap();
        assert_eq!(objects[0].bbox, local_object().bbox);
        assert_eq!(objects[0].space, CoordinateSpace::Global);
    }
}
