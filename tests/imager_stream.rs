//! Imager server and remote on two ends of a connection

use parking_lot::Mutex;
use setu_io::connection::{LoopbackConnection, SharedConnection, dispatch_pending};
use setu_io::imager::{
    ChannelDescriptor, Extents, ImageDescription, ImagerRemote, ImagerServer, PackOptions, Region,
    RegionRect, StridedView, StridedViewMut,
};
use std::sync::Arc;

fn pair() -> (SharedConnection, SharedConnection) {
    let (a, b) = LoopbackConnection::pair();
    (Arc::new(Mutex::new(a)), Arc::new(Mutex::new(b)))
}

#[test]
fn test_region_reaches_remote_after_description() {
    let (server_conn, client_conn) = pair();
    let mut server = ImagerServer::new("Camera0", server_conn.clone(), 640, 480, Extents::default())
        .unwrap();
    server
        .add_channel(ChannelDescriptor::new("intensity", "unsigned8bit"))
        .unwrap();

    let mut remote = ImagerRemote::new("Camera0", &client_conn).unwrap();
    let descriptions = Arc::new(Mutex::new(0));
    let d = descriptions.clone();
    remote.on_description(move |desc: &ImageDescription, _| {
        assert_eq!((desc.cols, desc.rows), (640, 480));
        *d.lock() += 1;
    });
    let pixels = Arc::new(Mutex::new(Vec::new()));
    let p = pixels.clone();
    remote.on_region(move |region: &Region<'_>, _| {
        p.lock().push(region.read_unscaled_pixel::<u8>(2, 1));
    });

    let data: Vec<u8> = (0..16).collect();
    server
        .send_region(
            0,
            RegionRect::new(0, 3, 0, 3),
            &StridedView::dense(&data, 4),
            PackOptions::default(),
        )
        .unwrap();

    // Ping from the remote's constructor reaches the server too
    dispatch_pending(&server_conn, &mut [&mut server]).unwrap();
    dispatch_pending(&client_conn, &mut [&mut remote]).unwrap();

    assert_eq!(*pixels.lock(), vec![Some(6)]);
    assert_eq!(*descriptions.lock(), 2);
    assert_eq!(remote.cols(), Some(640));
    assert_eq!(remote.dropped_regions(), 0);
}

#[test]
fn test_strided_float_region_into_destination_buffer() {
    let (server_conn, client_conn) = pair();
    let mut server =
        ImagerServer::new("Range0", server_conn, 16, 8, Extents::default()).unwrap();
    server
        .add_channel(ChannelDescriptor::new("depth", "meters"))
        .unwrap();
    let mut remote = ImagerRemote::new("Range0", &client_conn).unwrap();

    // Interleaved source: depth in every other element
    let source: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();
    server
        .send_region_f32(0, RegionRect::new(2, 5, 1, 2), &source, 2, 8, PackOptions::default())
        .unwrap();

    let decoded = Arc::new(Mutex::new(vec![0.0f32; 16 * 8]));
    let out = decoded.clone();
    remote.on_region(move |region: &Region<'_>, _| {
        let mut dest = out.lock();
        let mut view = StridedViewMut::dense(&mut dest, 16);
        region
            .decode_unscaled_into(&mut view, PackOptions::default())
            .unwrap();
    });
    dispatch_pending(&client_conn, &mut [&mut remote]).unwrap();

    let dest = decoded.lock();
    // (col 3, row 2) came from source[3 * 2 + 2 * 8]
    assert_eq!(dest[2 * 16 + 3], source[22]);
    assert_eq!(dest[16 + 2], source[12]);
    assert_eq!(dest[0], 0.0);
}

#[test]
fn test_dropped_connection_forgets_description() {
    let (a, b) = LoopbackConnection::pair();
    let server_conn: SharedConnection = Arc::new(Mutex::new(a));
    let client = Arc::new(Mutex::new(b));
    let client_conn: SharedConnection = client.clone();

    let mut server = ImagerServer::new("Camera0", server_conn, 4, 4, Extents::default()).unwrap();
    server
        .add_channel(ChannelDescriptor::new("intensity", "unsigned8bit"))
        .unwrap();
    server.send_description().unwrap();

    let mut remote = ImagerRemote::new("Camera0", &client_conn).unwrap();
    dispatch_pending(&client_conn, &mut [&mut remote]).unwrap();
    assert!(remote.description().is_some());

    client.lock().simulate_drop();
    dispatch_pending(&client_conn, &mut [&mut remote]).unwrap();
    assert!(remote.description().is_none());
    assert_eq!(remote.rows(), None);
}
