mod common;

use common::{linear, nv12_1080p, nv12_small, rig, BUFFER_LEN};
use pretty_assertions::assert_eq;
use ubwcp::{BufferAttrs, BufferHandle, Direction, ImageFormat, MmapConfig, UbwcpError};

fn accepts(attrs: BufferAttrs) -> bool {
    let rig = rig();
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &attrs).is_ok()
}

#[test]
fn stride_boundaries() {
    assert!(accepts(BufferAttrs::new(ImageFormat::Nv12, 64, 32, 64, 32)));
    assert!(!accepts(BufferAttrs::new(ImageFormat::Nv12, 64, 32, 65, 32)));
    assert!(!accepts(BufferAttrs::new(ImageFormat::Nv12, 128, 32, 64, 32)));
}

#[test]
fn dimension_limits() {
    let max = 10 * 1024;
    assert!(accepts(BufferAttrs::new(ImageFormat::Linear, max, 16, max, 16)));
    assert!(!accepts(BufferAttrs::new(ImageFormat::Linear, max + 1, 16, max + 64, 16)));
    assert!(accepts(BufferAttrs::new(ImageFormat::Linear, 64, max, 64, max)));
    assert!(!accepts(BufferAttrs::new(ImageFormat::Linear, 64, max + 1, 64, max + 1)));
}

#[test]
fn scanline_window() {
    for scanlines in 32..=42 {
        assert!(accepts(BufferAttrs::new(ImageFormat::Nv12, 64, 32, 64, scanlines)));
    }
    assert!(!accepts(BufferAttrs::new(ImageFormat::Nv12, 64, 32, 64, 31)));
    assert!(!accepts(BufferAttrs::new(ImageFormat::Nv12, 64, 32, 64, 43)));
}

#[test]
fn planar_padding_limit() {
    assert!(accepts(nv12_small().with_planar_padding(4096)));
    assert!(!accepts(nv12_small().with_planar_padding(4097)));
}

#[test]
fn unsupported_fields_are_rejected() {
    let unknown_format = BufferAttrs {
        image_format: 99,
        ..nv12_small()
    };
    let lossy = BufferAttrs {
        compression_type: 1,
        ..nv12_small()
    };
    let offset = BufferAttrs {
        y_offset: 64,
        ..nv12_small()
    };
    let no_cpu = BufferAttrs {
        sub_system_target: 0,
        ..nv12_small()
    };
    for attrs in [unknown_format, lossy, offset, no_cpu] {
        let rig = rig();
        let handle = rig.surface(1);
        assert!(matches!(
            rig.driver.set_attributes(handle, &attrs),
            Err(UbwcpError::InvalidAttrs(_))
        ));
    }
}

#[test]
fn busy_while_locked_leaves_surface_untouched() {
    let rig = rig();
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &nv12_small()).unwrap();
    rig.driver.lock(handle, Direction::Read).unwrap();
    let before = rig.driver.surface_info(handle).unwrap();

    assert_eq!(
        rig.driver.set_attributes(handle, &nv12_1080p()),
        Err(UbwcpError::Busy)
    );
    assert_eq!(
        rig.driver.set_attributes(handle, &BufferAttrs {
            width: 1,
            ..nv12_small()
        }),
        Err(UbwcpError::Busy)
    );
    assert_eq!(rig.driver.surface_info(handle).unwrap(), before);
    assert_eq!(rig.driver.stats().attrs_failed, 0);
}

#[test]
fn failed_set_clears_previous_attributes() {
    let rig = rig();
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &nv12_small()).unwrap();
    assert_eq!(rig.driver.ula_reservations().len(), 1);

    let bad = nv12_small().with_planar_padding(5000);
    assert!(rig.driver.set_attributes(handle, &bad).is_err());

    let info = rig.driver.surface_info(handle).unwrap();
    assert!(!info.attrs_set());
    assert_eq!(info.ula, None);
    assert_eq!(info.descriptor_image, None);
    assert!(rig.driver.ula_reservations().is_empty());
    assert_eq!(rig.buffers.attached_count(), 0);
    assert_eq!(rig.buffers.record(handle).unwrap().mmap, MmapConfig::Linear);
    assert_eq!(rig.driver.get_attributes(handle), Err(UbwcpError::NotSet));
    assert!(matches!(
        rig.driver.lock(handle, Direction::Read),
        Err(UbwcpError::Invalid(_))
    ));
}

#[test]
fn misaligned_uv_start_resets_the_surface() {
    let rig = rig();
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &nv12_small()).unwrap();

    // 64x32 luma plane plus 32 bytes of padding puts the UV plane mid cache line.
    assert!(matches!(
        rig.driver
            .set_attributes(handle, &nv12_small().with_planar_padding(32)),
        Err(UbwcpError::InvalidAttrs(_))
    ));
    let info = rig.driver.surface_info(handle).unwrap();
    assert!(!info.attrs_set());
    assert_eq!(info.ula, None);
    assert!(rig.driver.ula_reservations().is_empty());
    assert_eq!(rig.buffers.attached_count(), 0);

    rig.driver
        .set_attributes(handle, &nv12_small().with_planar_padding(64))
        .unwrap();
}

#[test]
fn identical_attributes_give_identical_state() {
    let rig = rig();
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &nv12_1080p()).unwrap();
    let first = rig.driver.surface_info(handle).unwrap();
    rig.driver.set_attributes(handle, &nv12_1080p()).unwrap();
    assert_eq!(rig.driver.surface_info(handle).unwrap(), first);
    assert_eq!(rig.driver.ula_reservations().len(), 1);
}

#[test]
fn short_backing_buffer_is_rejected() {
    let rig = rig();
    let handle = rig.surface_with_len(1, 1 << 20);
    assert!(matches!(
        rig.driver.set_attributes(handle, &nv12_1080p()),
        Err(UbwcpError::Fail(_))
    ));
    assert!(rig.driver.ula_reservations().is_empty());
    assert_eq!(rig.buffers.attached_count(), 0);
}

#[test]
fn platform_failures_surface_as_fail() {
    let rig = rig();
    let handle = rig.surface(1);
    rig.buffers.fail_next_mmaps(1);
    let err = rig.driver.set_attributes(handle, &nv12_small()).unwrap_err();
    assert!(matches!(err, UbwcpError::Fail(_)));
    assert_eq!(err.errno(), -5);

    rig.buffers.fail_next_attaches(1);
    assert!(matches!(
        rig.driver.set_attributes(handle, &nv12_small()),
        Err(UbwcpError::Fail(_))
    ));
    assert!(rig.driver.ula_reservations().is_empty());

    rig.driver.set_attributes(handle, &nv12_small()).unwrap();
    assert_eq!(rig.driver.stats().attrs_failed, 2);
    assert_eq!(rig.driver.stats().attrs_set, 1);
}

#[test]
fn ula_pool_exhaustion_is_out_of_space() {
    let config = ubwcp::UbwcpConfig {
        ula_pool_size: 0x10_0000,
        ..common::test_config()
    };
    let rig = common::rig_with(ubwcp::HwVersion::new(1, 1), config);
    let handle = rig.surface(1);
    assert_eq!(
        rig.driver.set_attributes(handle, &nv12_1080p()),
        Err(UbwcpError::OutOfSpace { size: 3_133_440 })
    );
    assert!(!rig.driver.surface_info(handle).unwrap().attrs_set());
}

#[test]
fn relinearizing_releases_the_window() {
    let rig = rig();
    let handle = rig.surface(1);
    rig.driver.set_attributes(handle, &nv12_small()).unwrap();
    rig.driver.set_attributes(handle, &linear()).unwrap();
    assert!(rig.driver.ula_reservations().is_empty());
    assert_eq!(rig.buffers.attached_count(), 0);
    assert!(rig.driver.surface_info(handle).unwrap().attrs_set());
}

#[test]
fn unknown_and_duplicate_handles() {
    let rig = rig();
    let missing = BufferHandle(404);
    assert!(matches!(
        rig.driver.set_attributes(missing, &nv12_small()),
        Err(UbwcpError::Invalid(_))
    ));
    assert!(rig.driver.get_attributes(missing).is_err());
    assert!(rig.driver.lock(missing, Direction::Read).is_err());
    assert!(rig.driver.unlock(missing, Direction::Read).is_err());
    assert!(rig.driver.free(missing).is_err());
    assert!(rig.driver.set_permanent_translation(missing, true).is_err());

    let handle = rig.surface_with_len(1, BUFFER_LEN);
    let err = rig.driver.create(handle).unwrap_err();
    assert_eq!(err, UbwcpError::AlreadyExists(handle));
    assert_eq!(err.errno(), -17);
    assert_eq!(rig.driver.surface_count(), 1);
}
