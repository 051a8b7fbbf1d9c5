use nalgebra::{Point3, Vector3};

use seam::kernel::{DoseGrid, Kernel, RegionExpr, RegionKind};
use seam::phantom::{self, PhantomHost};
use seam::settings;
use seam::workflow::JunctionPlan;

// Tolerance for comparing accumulated f32 dose values.
const DOSE_TOL: f64 = 0.1;

#[test]
fn full_workflow_feathers_junction() {
    let settings = settings::load_default_config().unwrap();
    let kernel = phantom::demo_session(&settings);
    let mut plan = JunctionPlan::new(kernel, settings);

    plan.run().unwrap();
    let report = &plan.report;

    // Junction sits at the lower kidney pole, centered on the patient.
    assert_eq!(report.junction_mm, [0.0, 0.0, -130.0]);

    // One slab per ladder level in each frame, kept as treatable targets.
    assert_eq!(report.superior_slabs.len(), 9);
    assert_eq!(report.inferior_slabs.len(), 9);
    assert_eq!(report.superior_slabs[0], "zJnc10");
    assert_eq!(report.superior_slabs[8], "zJnc90");
    for slab in &report.superior_slabs {
        assert_eq!(
            plan.kernel.region_kind("CT_SUP", slab),
            Some(RegionKind::Target)
        );
        assert!(plan.kernel.has_contours("CT_SUP", slab));
    }
    for slab in &report.inferior_slabs {
        assert_eq!(
            plan.kernel.region_kind("CT_INF", slab),
            Some(RegionKind::Target)
        );
        assert!(plan.kernel.has_contours("CT_INF", slab));
    }

    // The demo dose spans the whole ladder, so every band is exact.
    assert_eq!(report.bands.len(), 9);
    assert!(report.substitutions.is_empty());
    for band in &report.bands {
        assert_eq!(band.used_percent, band.slot_percent);
        assert!(band.volume_cc > 0.0);
    }
    assert_eq!(report.bands[0].slot_percent, 90);
    assert_eq!(report.bands[8].slot_percent, 10);

    // All nine bands were mapped into the recipient frame and are mutually
    // exclusive there.
    assert_eq!(report.mapped.len(), 9);
    for name in &report.mapped {
        assert!(plan.kernel.has_contours("CT_INF", name));
    }
    for (i, a) in report.mapped.iter().enumerate() {
        for b in report.mapped.iter().skip(i + 1) {
            let expr = RegionExpr::named(a).and(RegionExpr::named(b));
            plan.kernel
                .create_region("CT_INF", "overlapProbe", &expr)
                .unwrap();
            assert!(
                !plan.kernel.has_contours("CT_INF", "overlapProbe"),
                "bands {} and {} overlap",
                a,
                b
            );
            plan.kernel.delete_region("CT_INF", "overlapProbe").unwrap();
        }
    }

    // No transient artifact survives in the donor frame.
    assert_eq!(plan.kernel.region_kind("CT_SUP", "zJunction"), None);
    for level in [10u32, 20, 30, 40, 50, 60, 70, 80, 85, 90] {
        assert_eq!(
            plan.kernel
                .region_kind("CT_SUP", &format!("doseRaw{}", level)),
            None
        );
        assert_eq!(
            plan.kernel
                .region_kind("CT_SUP", &format!("doseBand{}", level)),
            None
        );
    }

    // The inferior grid grew to cover the couch and the long external; the
    // superior grid already covered its anatomy.
    let inferior_grid = plan.kernel.dose_grid("CT_INF").unwrap();
    assert!(inferior_grid.corner.y <= -160.0);
    assert!(inferior_grid.corner.z <= -350.0);
    let superior_grid = plan.kernel.dose_grid("CT_SUP").unwrap();
    assert_eq!(superior_grid.corner, Point3::new(-200.0, -150.0, -350.0));

    // Complementary ramps weighted by 15 fractions each sum to a flat
    // 3000 cGy course dose across the junction.
    let composite = report.composite.as_ref().unwrap();
    assert_eq!(composite.weights, (15, 15));
    assert!((composite.max_cgy - 3000.0).abs() < DOSE_TOL);
    assert!((composite.mean_cgy - 3000.0).abs() < DOSE_TOL);
}

#[test]
fn ninety_percent_slot_falls_back_to_eighty_five() {
    let settings = settings::load_default_config().unwrap();
    let mut kernel = phantom::demo_session(&settings);
    // Donor field peaks at 87% of prescription: the 90% threshold region is
    // empty, the 85% fallback is not, and every other level stays exact.
    kernel
        .set_dose_ramp(
            "CT_SUP",
            0.87 * settings.prescription_cgy_per_fraction,
            -130.0,
            -310.0,
        )
        .unwrap();

    let mut plan = JunctionPlan::new(kernel, settings);
    plan.run().unwrap();
    let report = &plan.report;

    assert_eq!(report.bands.len(), 9);
    assert_eq!(report.substitutions.len(), 1);
    assert_eq!(report.substitutions[0].slot_percent, 90);
    assert_eq!(report.substitutions[0].used_percent, 85);

    let top = &report.bands[0];
    assert_eq!(top.slot_percent, 90);
    assert_eq!(top.used_percent, 85);
    assert_eq!(top.name, "doseBand90");
    for band in report.bands.iter().skip(1) {
        assert_eq!(band.used_percent, band.slot_percent);
    }

    // The substituted band maps along with the rest.
    assert_eq!(report.mapped.len(), 9);
    assert!(plan.kernel.has_contours("CT_INF", "doseBand90"));
}

#[test]
fn missing_organ_halts_before_any_dose() {
    let settings = settings::load_default_config().unwrap();
    let mut kernel = phantom::demo_session(&settings);
    kernel.delete_region("CT_SUP", "Kidney_L").unwrap();

    let mut plan = JunctionPlan::new(kernel, settings);
    let err = plan.run().unwrap_err();
    assert!(err.to_string().contains("Kidney_L"));
    assert!(err.to_string().contains("CT_SUP"));

    // The workflow stopped before any dose computation.
    assert!(plan.kernel.frame_dose("CT_SUP").is_err());
    assert!(plan.kernel.frame_dose("CT_INF").is_err());
}

#[test]
fn missing_registration_halts_before_slab_construction() {
    let settings = settings::load_default_config().unwrap();
    let mut kernel = PhantomHost::new();
    let grid = DoseGrid {
        corner: Point3::new(-100.0, -100.0, -200.0),
        voxel: Vector3::new(5.0, 5.0, 5.0),
        shape: [40, 40, 80],
    };
    kernel.add_frame("CT_SUP", 5.0, grid.clone());
    kernel.add_frame("CT_INF", 5.0, grid);
    for frame in ["CT_SUP", "CT_INF"] {
        kernel
            .add_box_region(
                frame,
                "External",
                RegionKind::External,
                Point3::new(0.0, 0.0, 0.0),
                Vector3::new(150.0, 150.0, 300.0),
            )
            .unwrap();
    }
    kernel
        .add_box_region(
            "CT_SUP",
            "Kidney_L",
            RegionKind::Organ,
            Point3::new(30.0, 0.0, -20.0),
            Vector3::new(40.0, 40.0, 60.0),
        )
        .unwrap();
    kernel
        .add_box_region(
            "CT_SUP",
            "Kidney_R",
            RegionKind::Organ,
            Point3::new(-30.0, 0.0, -30.0),
            Vector3::new(40.0, 40.0, 60.0),
        )
        .unwrap();
    // No registration recorded in either direction.

    let mut plan = JunctionPlan::new(kernel, settings);
    let err = plan.run().unwrap_err();
    assert!(err.to_string().contains("CT_SUP"));
    assert!(err.to_string().contains("CT_INF"));

    // Nothing was built: the correspondence check precedes slab creation.
    assert_eq!(plan.kernel.region_kind("CT_SUP", "zJnc10"), None);
    assert_eq!(plan.kernel.region_kind("CT_INF", "zJnc10"), None);
    assert!(plan.kernel.frame_dose("CT_SUP").is_err());
}
