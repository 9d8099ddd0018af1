//! Scenarios diffing a probed devicegraph against a staging devicegraph.

use std::{collections::BTreeSet, sync::Arc};

use maplit::btreeset;
use sysdefs::{
    filesystems::FsType,
    units::{GIB, KIB, MIB},
};

use crate::{
    devicegraph::{DeviceGraph, DeviceIndex, Holder, ResizeReasons, Sid, SidAllocator},
    devices::{
        DeviceType, Disk, Encryption, Filesystem, LvmLv, LvmVg, Multipath, Partition,
        PartitionTable, PartitionType, PtType,
    },
    error::{ActionGraphError, CommitError},
    primitives::region::Region,
};

use super::{
    Action, ActionGraph, ActionGraphBuilder, ActionKind, ActionTag, RecordingRunner, ReallotMode,
    ResizeMode, Side, Tense,
};

/// Sectors per GiB.
const SPG: u64 = GIB / 512;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_graph() -> DeviceGraph {
    DeviceGraph::new(Arc::new(SidAllocator::starting_at(1)))
}

fn sid(graph: &DeviceGraph, index: DeviceIndex) -> Sid {
    graph.device(index).unwrap().sid()
}

fn disk(graph: &mut DeviceGraph, name: &str) -> DeviceIndex {
    Disk::create(graph, name, Region::new(0, 160 * SPG, 512)).unwrap()
}

/// Partition spanning `start..end`, both in GiB.
fn partition(
    graph: &mut DeviceGraph,
    table: DeviceIndex,
    name: &str,
    start: u64,
    end: u64,
) -> DeviceIndex {
    Partition::create(
        graph,
        table,
        name,
        Region::new(start * SPG, (end - start) * SPG, 512),
        PartitionType::Primary,
    )
    .unwrap()
}

fn filesystem(
    graph: &mut DeviceGraph,
    blk: DeviceIndex,
    fs_type: FsType,
    mount_point: Option<&str>,
) -> DeviceIndex {
    let fs = Filesystem::create(graph, blk, fs_type).unwrap();
    graph
        .variant_mut::<Filesystem>(sid(graph, fs))
        .unwrap()
        .mount_point = mount_point.map(String::from);
    fs
}

fn set_partition_length(graph: &mut DeviceGraph, index: DeviceIndex, length: u64) {
    graph
        .variant_mut::<Partition>(sid(graph, index))
        .unwrap()
        .region
        .length = length;
}

/// Checks that no action is committed before one it depends on.
fn assert_order_respects_dependencies(actions: &ActionGraph<'_>) {
    let order: Vec<&Action> = actions.commit_order().collect();
    for (i, earlier) in order.iter().enumerate() {
        for later in &order[i + 1..] {
            assert!(
                !actions.precedes(later, earlier),
                "'{later}' must come before '{earlier}'"
            );
        }
    }
}

/// sda (GPT) with sda1 (ext4 on /boot) and sda2 (PV of VG "system" with LV
/// "root", xfs on /).
struct Sample {
    graph: DeviceGraph,
    sda: DeviceIndex,
    gpt: DeviceIndex,
    sda1: DeviceIndex,
    boot: DeviceIndex,
    vg: DeviceIndex,
}

fn sample() -> Sample {
    let mut graph = new_graph();
    let sda = disk(&mut graph, "/dev/sda");
    let gpt = PartitionTable::create(&mut graph, sda, PtType::Gpt).unwrap();
    let sda1 = partition(&mut graph, gpt, "/dev/sda1", 1, 2);
    let boot = filesystem(&mut graph, sda1, FsType::Ext4, Some("/boot"));
    let sda2 = partition(&mut graph, gpt, "/dev/sda2", 2, 40);
    let vg = LvmVg::create(&mut graph, "system").unwrap();
    LvmVg::add_lvm_pv(&mut graph, vg, sda2).unwrap();
    let root = LvmLv::create(&mut graph, vg, "root", 20 * GIB).unwrap();
    filesystem(&mut graph, root, FsType::Xfs, Some("/"));

    Sample {
        graph,
        sda,
        gpt,
        sda1,
        boot,
        vg,
    }
}

#[test]
fn test_identical_graphs() {
    init_logging();
    let probed = sample().graph;
    let staging = probed.clone();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert!(actions.is_empty());
    assert_eq!(actions.num_dependencies(), 0);
    assert!(actions.text(Tense::SimplePresent).unwrap().is_empty());
}

#[test]
fn test_create_only() {
    init_logging();
    let mut probed = new_graph();
    let sda = disk(&mut probed, "/dev/sda");

    let mut staging = probed.clone();
    let gpt = PartitionTable::create(&mut staging, sda, PtType::Gpt).unwrap();
    let sda1 = Partition::create(
        &mut staging,
        gpt,
        "/dev/sda1",
        Region::new(2048, 10 * SPG, 512),
        PartitionType::Primary,
    )
    .unwrap();
    let fs = filesystem(&mut staging, sda1, FsType::Ext4, Some("/"));

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert_eq!(actions.num_actions(), 4);
    assert!(actions.actions().all(|action| !action.is_delete()));

    let create = |index| Action::new(sid(&staging, index), ActionKind::Create);
    let mount = Action::new(sid(&staging, fs), ActionKind::Mount { side: Side::Rhs });
    assert!(actions.has_dependency(&create(gpt), &create(sda1)));
    assert!(actions.has_dependency(&create(sda1), &create(fs)));
    assert!(actions.has_dependency(&create(fs), &mount));

    assert_eq!(
        actions.text(Tense::SimplePresent).unwrap(),
        vec![
            "Create GPT partition table on /dev/sda",
            "Create partition /dev/sda1 (10 GiB)",
            "Create ext4 filesystem on /dev/sda1 (10 GiB)",
            "Mount /dev/sda1 at /",
        ]
    );

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(
        runner.into_commands(),
        vec![
            "parted --script /dev/sda mklabel gpt",
            "parted --script --align none /dev/sda unit s mkpart primary 2048s 20973567s",
            "mkfs.ext4 -F /dev/sda1",
            "mount -t ext4 /dev/sda1 /",
        ]
    );
}

#[test]
fn test_delete_only() {
    init_logging();
    let Sample {
        graph: probed,
        gpt,
        ..
    } = sample();

    let mut staging = probed.clone();
    staging.remove_descendants(gpt).unwrap();
    staging.remove_vertex(gpt).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert!(actions.actions().all(|action| action.is_delete()
        || matches!(action.kind, ActionKind::Unmount { .. })));
    // gpt, sda1, boot, sda2, pv, vg, root lv and its filesystem
    assert_eq!(actions.actions().filter(|action| action.is_delete()).count(), 8);
    assert_order_respects_dependencies(&actions);

    let order: Vec<String> = actions.text(Tense::SimplePresent).unwrap();
    assert_eq!(order.last().unwrap(), "Delete GPT partition table on /dev/sda");
    let position = |text: &str| order.iter().position(|line| line.starts_with(text)).unwrap();
    assert!(position("Unmount /dev/system/root at /") < position("Delete xfs on /dev/system/root"));
    assert!(
        position("Delete logical volume /dev/system/root (20 GiB)")
            < position("Delete volume group system")
    );
    assert!(
        position("Delete volume group system") < position("Delete physical volume on /dev/sda2")
    );
    assert!(
        position("Delete physical volume on /dev/sda2")
            < position("Delete partition /dev/sda2 (38 GiB)")
    );
}

#[test]
fn test_delete_partition_with_filesystem() {
    init_logging();
    let Sample {
        graph: probed,
        sda1,
        boot,
        ..
    } = sample();

    let mut staging = probed.clone();
    staging.remove_vertex(boot).unwrap();
    staging.remove_vertex(sda1).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let boot = sid(&probed, boot);
    let sda1 = sid(&probed, sda1);
    let unmount = Action::new(boot, ActionKind::Unmount { side: Side::Lhs });
    let delete = |sid| {
        Action::new(
            sid,
            ActionKind::Delete {
                only_in_devicegraph: false,
            },
        )
    };

    assert_eq!(actions.num_actions(), 3);
    assert!(actions.has_dependency(&unmount, &delete(boot)));
    assert!(actions.precedes(&unmount, &delete(sda1)));
    assert!(actions.precedes(&delete(boot), &delete(sda1)));

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(
        runner.commands(),
        [
            "umount /boot",
            "wipefs --all /dev/sda1",
            "parted --script /dev/sda rm 1",
        ]
    );
}

#[test]
fn test_add_logical_volume() {
    init_logging();
    let Sample { graph: probed, vg, .. } = sample();

    let mut staging = probed.clone();
    let home = LvmLv::create(&mut staging, vg, "home", 10 * GIB).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let expected = Action::new(sid(&staging, home), ActionKind::Create);
    assert_eq!(actions.actions().collect::<Vec<_>>(), vec![&expected]);

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(
        runner.commands(),
        ["lvcreate --yes --name home --size 10737418240b system"]
    );
}

#[test]
fn test_reallot() {
    init_logging();
    let mut probed = new_graph();
    let sda = disk(&mut probed, "/dev/sda");
    let sdb = disk(&mut probed, "/dev/sdb");
    let sdc = disk(&mut probed, "/dev/sdc");
    let vg = LvmVg::create(&mut probed, "data").unwrap();
    let pv_a = LvmVg::add_lvm_pv(&mut probed, vg, sda).unwrap();
    LvmVg::add_lvm_pv(&mut probed, vg, sdb).unwrap();

    let mut staging = probed.clone();
    LvmVg::remove_lvm_pv(&mut staging, vg, sda).unwrap();
    let pv_c = LvmVg::add_lvm_pv(&mut staging, vg, sdc).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let vg = sid(&probed, vg);
    let pv_a = sid(&probed, pv_a);
    let pv_c = sid(&staging, pv_c);

    let reallots: Vec<&Action> = actions
        .actions()
        .filter(|action| action.tag() == ActionTag::Reallot)
        .collect();
    let extend = Action::new(
        vg,
        ActionKind::Reallot {
            mode: ReallotMode::Extend,
            peer: pv_c,
        },
    );
    let reduce = Action::new(
        vg,
        ActionKind::Reallot {
            mode: ReallotMode::Reduce,
            peer: pv_a,
        },
    );
    assert_eq!(reallots.len(), 2);
    assert!(reallots.contains(&&extend));
    assert!(reallots.contains(&&reduce));

    let sids: BTreeSet<Sid> = actions.actions().map(|action| action.sid).collect();
    assert_eq!(sids, btreeset! {vg, pv_a, pv_c});

    let delete_pv_a = Action::new(
        pv_a,
        ActionKind::Delete {
            only_in_devicegraph: false,
        },
    );
    let create_pv_c = Action::new(pv_c, ActionKind::Create);
    assert!(actions.has_dependency(&reduce, &delete_pv_a));
    assert!(actions.has_dependency(&create_pv_c, &extend));
    assert_order_respects_dependencies(&actions);

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    let commands = runner.into_commands();
    assert_eq!(commands.len(), 4);
    assert!(commands.contains(&"vgreduce data /dev/sda".to_string()));
    assert!(commands.contains(&"vgextend data /dev/sdc".to_string()));
}

#[test]
fn test_rename_volume_group() {
    let Sample { graph: probed, vg, .. } = sample();

    let mut staging = probed.clone();
    staging
        .variant_mut::<LvmVg>(sid(&staging, vg))
        .unwrap()
        .vg_name = "sys".into();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert_eq!(
        actions.text(Tense::PresentContinuous).unwrap(),
        vec!["Renaming volume group system to sys"]
    );

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(runner.commands(), ["vgrename system sys"]);
}

#[test]
fn test_shrink_partition_with_filesystem() {
    init_logging();
    let Sample {
        graph: probed,
        sda1,
        boot,
        ..
    } = sample();

    let mut staging = probed.clone();
    set_partition_length(&mut staging, sda1, SPG / 2);

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let shrink = |index| Action::new(sid(&probed, index), ActionKind::resize(ResizeMode::Shrink));
    assert_eq!(actions.num_actions(), 2);
    assert!(actions.has_dependency(&shrink(boot), &shrink(sda1)));
    assert_eq!(
        shrink(sda1).kind,
        ActionKind::Resize {
            mode: ResizeMode::Shrink,
            side: Side::Lhs
        }
    );

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(
        runner.commands(),
        [
            "resize2fs /dev/sda1 524288K",
            "parted --script /dev/sda unit s resizepart 1 3145727s",
        ]
    );
}

#[test]
fn test_grow_partition_with_physical_volume() {
    init_logging();
    let mut probed = new_graph();
    let sda = disk(&mut probed, "/dev/sda");
    let gpt = PartitionTable::create(&mut probed, sda, PtType::Gpt).unwrap();
    let sda1 = partition(&mut probed, gpt, "/dev/sda1", 1, 11);
    let vg = LvmVg::create(&mut probed, "system").unwrap();
    let pv = LvmVg::add_lvm_pv(&mut probed, vg, sda1).unwrap();

    let mut staging = probed.clone();
    set_partition_length(&mut staging, sda1, 20 * SPG);
    let lv = LvmLv::create(&mut staging, vg, "big", 15 * GIB).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let grow = |index| Action::new(sid(&probed, index), ActionKind::resize(ResizeMode::Grow));
    let create_lv = Action::new(sid(&staging, lv), ActionKind::Create);

    assert_eq!(actions.num_actions(), 3);
    assert!(actions.has_dependency(&grow(sda1), &grow(pv)));
    assert!(actions.has_dependency(&grow(pv), &create_lv));
    assert_order_respects_dependencies(&actions);

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(
        runner.commands(),
        [
            "parted --script /dev/sda unit s resizepart 1 44040191s",
            "pvresize /dev/sda1",
            "lvcreate --yes --name big --size 16106127360b system",
        ]
    );
}

#[test]
fn test_replace_partition() {
    init_logging();
    let Sample {
        graph: probed,
        gpt,
        sda1,
        boot,
        ..
    } = sample();

    let mut staging = probed.clone();
    staging.remove_vertex(boot).unwrap();
    staging.remove_vertex(sda1).unwrap();
    let esp = Partition::create(
        &mut staging,
        gpt,
        "/dev/sda1",
        Region::new(SPG, SPG / 2, 512),
        PartitionType::Primary,
    )
    .unwrap();
    staging.variant_mut::<Partition>(sid(&staging, esp)).unwrap().id = 0xef;

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let delete_old = Action::new(
        sid(&probed, sda1),
        ActionKind::Delete {
            only_in_devicegraph: false,
        },
    );
    let create_new = Action::new(sid(&staging, esp), ActionKind::Create);
    assert!(actions.has_dependency(&delete_old, &create_new));
    assert_order_respects_dependencies(&actions);

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(
        runner.commands()[3..],
        [
            "parted --script --align none /dev/sda unit s mkpart primary 2097152s 3145727s",
            "parted --script /dev/sda type 1 c12a7328-f81f-11d2-ba4b-00a0c93ec93b",
        ]
    );
}

#[test]
fn test_nested_mount_points() {
    init_logging();
    let mut probed = new_graph();
    let sda = disk(&mut probed, "/dev/sda");
    PartitionTable::create(&mut probed, sda, PtType::Gpt).unwrap();

    let mut staging = probed.clone();
    let gpt = staging.device(sda).unwrap().children()[0].index();
    let sda1 = partition(&mut staging, gpt, "/dev/sda1", 1, 2);
    let sda2 = partition(&mut staging, gpt, "/dev/sda2", 2, 3);
    // Created in the opposite order of their mount points.
    let efi = filesystem(&mut staging, sda1, FsType::Vfat, Some("/boot/efi"));
    let boot = filesystem(&mut staging, sda2, FsType::Ext4, Some("/boot"));

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let mount = |index| Action::new(sid(&staging, index), ActionKind::Mount { side: Side::Rhs });
    assert!(actions.has_dependency(&mount(boot), &mount(efi)));
    assert!(!actions.precedes(&mount(efi), &mount(boot)));

    // Unmounting goes the other way around.
    let actions = ActionGraph::build(&staging, &probed).unwrap();
    let unmount =
        |index| Action::new(sid(&staging, index), ActionKind::Unmount { side: Side::Lhs });
    assert!(actions.has_dependency(&unmount(efi), &unmount(boot)));
    assert_order_respects_dependencies(&actions);
}

#[test]
fn test_change_mount_point() {
    let Sample {
        graph: probed,
        boot,
        ..
    } = sample();

    let mut staging = probed.clone();
    staging
        .variant_mut::<Filesystem>(sid(&staging, boot))
        .unwrap()
        .mount_point = Some("/mnt/boot".into());

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert_eq!(
        actions.text(Tense::SimplePresent).unwrap(),
        vec!["Unmount /dev/sda1 at /boot", "Mount /dev/sda1 at /mnt/boot"]
    );
}

#[test]
fn test_unsupported_actions() {
    let mut probed = new_graph();
    let sda = disk(&mut probed, "/dev/sda");
    let sdb = disk(&mut probed, "/dev/sdb");

    let mut staging = probed.clone();
    let mpatha = Multipath::create(
        &mut staging,
        "/dev/mapper/mpatha",
        Region::new(0, 160 * SPG, 512),
        &[sda, sdb],
    )
    .unwrap();
    assert_eq!(
        ActionGraph::build(&probed, &staging).unwrap_err(),
        ActionGraphError::UnsupportedAction {
            sid: sid(&staging, mpatha),
            class: DeviceType::Multipath,
            action: "create",
        }
    );

    // Deleting a multipath device only flushes its map.
    let actions = ActionGraph::build(&staging, &probed).unwrap();
    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    assert_eq!(runner.commands(), ["multipath -f mpatha"]);

    let Sample {
        graph: probed,
        gpt,
        ..
    } = sample();
    let mut staging = probed.clone();
    staging
        .variant_mut::<PartitionTable>(sid(&staging, gpt))
        .unwrap()
        .pt_type = PtType::Msdos;
    assert!(matches!(
        ActionGraph::build(&probed, &staging),
        Err(ActionGraphError::UnsupportedAction {
            class: DeviceType::PartitionTable,
            ..
        })
    ));
}

#[test]
fn test_disk_stubs() {
    let probed = new_graph();
    let mut staging = probed.clone();
    disk(&mut staging, "/dev/sdb");

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert_eq!(
        actions.text(Tense::SimplePresent).unwrap(),
        vec!["Create disk /dev/sdb (160 GiB)"]
    );

    let mut runner = RecordingRunner::new();
    assert_eq!(
        actions.commit(&mut runner),
        Err(CommitError::StubCalled {
            class: DeviceType::Disk,
            verb: "do_create",
        })
    );
    assert!(runner.commands().is_empty());

    // Variants without a description of an action fall back to the stub text.
    let action = Action::new(
        sid(&staging, staging.roots()[0].index()),
        ActionKind::Mount { side: Side::Rhs },
    );
    assert_eq!(
        action.text(&actions.context(), Tense::SimplePresent).unwrap(),
        "error: stub do_mount_text called"
    );
}

#[test]
fn test_multipath_paths_changed() {
    init_logging();
    let mut probed = new_graph();
    let sda = disk(&mut probed, "/dev/sda");
    let sdb = disk(&mut probed, "/dev/sdb");
    let sdc = disk(&mut probed, "/dev/sdc");
    let mpatha = Multipath::create(
        &mut probed,
        "/dev/mapper/mpatha",
        Region::new(0, 160 * SPG, 512),
        &[sda, sdb],
    )
    .unwrap();

    let mut staging = probed.clone();
    staging.remove_edge(sdb, mpatha).unwrap();
    staging.add_edge(sdc, mpatha, Holder::User).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let mpatha = sid(&probed, mpatha);
    let extend = Action::new(
        mpatha,
        ActionKind::Reallot {
            mode: ReallotMode::Extend,
            peer: sid(&probed, sdc),
        },
    );
    let reduce = Action::new(
        mpatha,
        ActionKind::Reallot {
            mode: ReallotMode::Reduce,
            peer: sid(&probed, sdb),
        },
    );
    let all: Vec<&Action> = actions.actions().collect();
    assert_eq!(all.len(), 2);
    assert!(all.contains(&&extend));
    assert!(all.contains(&&reduce));
    assert_eq!(
        actions.text(Tense::SimplePresent).unwrap(),
        vec!["error: stub do_reallot_text called"; 2]
    );

    // Multipath maps have no way to change their paths.
    let mut runner = RecordingRunner::new();
    assert_eq!(
        actions.commit(&mut runner),
        Err(CommitError::StubCalled {
            class: DeviceType::Multipath,
            verb: "do_reallot",
        })
    );
    assert!(runner.commands().is_empty());
}

#[test]
fn test_filesystem_moved_to_new_partition() {
    init_logging();
    let Sample {
        graph: probed,
        gpt,
        sda1,
        boot,
        ..
    } = sample();

    let mut staging = probed.clone();
    let sda3 = partition(&mut staging, gpt, "/dev/sda3", 40, 42);
    staging.remove_edge(sda1, boot).unwrap();
    staging.add_edge(sda3, boot, Holder::User).unwrap();

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    let boot = sid(&probed, boot);
    let sda3 = sid(&staging, sda3);
    let extend = Action::new(
        boot,
        ActionKind::Reallot {
            mode: ReallotMode::Extend,
            peer: sda3,
        },
    );
    let reduce = Action::new(
        boot,
        ActionKind::Reallot {
            mode: ReallotMode::Reduce,
            peer: sid(&probed, sda1),
        },
    );
    let reallots: Vec<&Action> = actions
        .actions()
        .filter(|action| action.tag() == ActionTag::Reallot)
        .collect();
    assert_eq!(reallots.len(), 2);
    assert!(reallots.contains(&&extend));
    assert!(reallots.contains(&&reduce));
    assert!(actions.has_dependency(&Action::new(sda3, ActionKind::Create), &extend));
    assert_order_respects_dependencies(&actions);
}

#[test]
fn test_dangling_reference() {
    let lhs = new_graph();
    let rhs = new_graph();

    let mut builder = ActionGraphBuilder::new(&lhs, &rhs);
    builder.add_action(Action::new(Sid(999), ActionKind::Create));
    assert_eq!(
        builder.build().unwrap_err(),
        ActionGraphError::DanglingReference {
            sid: Sid(999),
            side: Side::Rhs,
        }
    );
}

#[test]
fn test_combined_changes() {
    init_logging();
    let Sample {
        graph: probed,
        sda,
        gpt,
        sda1,
        boot,
        vg,
    } = sample();

    let mut staging = probed.clone();
    staging.remove_vertex(boot).unwrap();
    let swap = filesystem(&mut staging, sda1, FsType::Swap, Some("swap"));
    staging
        .variant_mut::<Filesystem>(sid(&staging, swap))
        .unwrap()
        .label = "swap".into();
    let sda3 = partition(&mut staging, gpt, "/dev/sda3", 40, 60);
    LvmVg::add_lvm_pv(&mut staging, vg, sda3).unwrap();
    let sda4 = partition(&mut staging, gpt, "/dev/sda4", 60, 70);
    let cr = Encryption::create(&mut staging, sda4, "cr_home").unwrap();
    filesystem(&mut staging, cr, FsType::Btrfs, Some("/home"));

    let actions = ActionGraph::build(&probed, &staging).unwrap();
    assert_order_respects_dependencies(&actions);
    assert!(actions.actions().all(|action| action.sid != sid(&probed, sda)));

    let texts = actions.text(Tense::SimplePresent).unwrap();
    assert!(texts.contains(&"Extend volume group system by /dev/sda3".to_string()));
    assert!(texts.contains(
        &"Activate encryption layer device on /dev/sda4 as /dev/mapper/cr_home".to_string()
    ));
    assert!(texts.contains(&"Activate swap on /dev/sda1".to_string()));

    let mut runner = RecordingRunner::new();
    actions.commit(&mut runner).unwrap();
    let commands = runner.into_commands();
    assert_eq!(commands.len(), actions.num_actions());
    assert!(commands.contains(&"mkswap -f -L swap /dev/sda1".to_string()));
    assert!(commands.contains(&"cryptsetup --batch-mode luksFormat /dev/sda4".to_string()));
    assert!(commands.contains(&"mkfs.btrfs -f /dev/mapper/cr_home".to_string()));
}

#[test]
fn test_resize_info_msdos() {
    let mut graph = new_graph();
    let sda = disk(&mut graph, "/dev/sda");
    let msdos = PartitionTable::create(&mut graph, sda, PtType::Msdos).unwrap();
    let sda1 = partition(&mut graph, msdos, "/dev/sda1", 10, 20);
    let sda2 = partition(&mut graph, msdos, "/dev/sda2", 40, 60);
    filesystem(&mut graph, sda2, FsType::Ext4, None);
    let sda3 = partition(&mut graph, msdos, "/dev/sda3", 80, 120);
    filesystem(&mut graph, sda3, FsType::Swap, None);

    let limits = |index| {
        let info = graph.device(index).unwrap().detect_resize_info();
        assert!(info.resize_ok);
        assert!(info.reasons.is_empty());
        (info.min_size, info.max_size)
    };

    assert_eq!(limits(sda1), (512, 30 * GIB));
    assert_eq!(limits(sda2), (32 * MIB, 40 * GIB));
    assert_eq!(limits(sda3), (40 * KIB, 80 * GIB));

    let disk_info = graph.device(sda).unwrap().detect_resize_info();
    assert!(!disk_info.resize_ok);
    assert_eq!(disk_info.reasons, ResizeReasons::NO_SUPPORT);
}

#[test]
fn test_resize_info_gpt() {
    let mut graph = new_graph();
    let sda = disk(&mut graph, "/dev/sda");
    let gpt = PartitionTable::create(&mut graph, sda, PtType::Gpt).unwrap();
    let sda1 = partition(&mut graph, gpt, "/dev/sda1", 10, 20);
    let sda2 = partition(&mut graph, gpt, "/dev/sda2", 30, 40);
    let sda3 = partition(&mut graph, gpt, "/dev/sda3", 50, 60);

    let vg = LvmVg::create(&mut graph, "system").unwrap();
    LvmVg::add_lvm_pv(&mut graph, vg, sda1).unwrap();
    let lv1 = LvmLv::create(&mut graph, vg, "lv1", GIB).unwrap();
    let lv2 = LvmLv::create(&mut graph, vg, "lv2", GIB).unwrap();
    filesystem(&mut graph, lv2, FsType::Ext4, None);

    let cr = Encryption::create(&mut graph, sda2, "cr-test").unwrap();
    filesystem(&mut graph, cr, FsType::Ext4, None);

    let limits = |index| {
        let info = graph.device(index).unwrap().detect_resize_info();
        assert!(info.resize_ok);
        (info.min_size, info.max_size)
    };

    assert_eq!(limits(sda1), (5 * MIB, 20 * GIB));
    assert_eq!(limits(lv1), (4 * MIB, 9 * GIB - 4 * MIB));
    assert_eq!(limits(lv2), (32 * MIB, 9 * GIB - 4 * MIB));
    assert_eq!(limits(sda2), (34 * MIB, 20 * GIB));
    assert_eq!(limits(sda3), (512, 110 * GIB - 33 * 512));
}

#[test]
fn test_resize_info_no_space() {
    let mut graph = new_graph();
    let sda = disk(&mut graph, "/dev/sda");
    let gpt = PartitionTable::create(&mut graph, sda, PtType::Gpt).unwrap();
    let sda1 = partition(&mut graph, gpt, "/dev/sda1", 1, 2);
    partition(&mut graph, gpt, "/dev/sda2", 2, 3);
    filesystem(&mut graph, sda1, FsType::Xfs, None);

    let info = graph.device(sda1).unwrap().detect_resize_info();
    assert!(info.resize_ok);
    assert_eq!(
        info.reasons,
        ResizeReasons::NO_SPACE | ResizeReasons::FS_NO_SHRINK
    );
    assert_eq!((info.min_size, info.max_size), (GIB, GIB));

    // An xfs filesystem needs at least 300 MiB.
    let mut small = new_graph();
    let sdb = disk(&mut small, "/dev/sdb");
    let gpt = PartitionTable::create(&mut small, sdb, PtType::Gpt).unwrap();
    let sdb1 = Partition::create(
        &mut small,
        gpt,
        "/dev/sdb1",
        Region::new(2048, 100 * MIB / 512, 512),
        PartitionType::Primary,
    )
    .unwrap();
    Partition::create(
        &mut small,
        gpt,
        "/dev/sdb2",
        Region::new(2048 + 100 * MIB / 512, SPG, 512),
        PartitionType::Primary,
    )
    .unwrap();
    filesystem(&mut small, sdb1, FsType::Xfs, None);

    let info = small.device(sdb1).unwrap().detect_resize_info();
    assert!(!info.resize_ok);
    assert!(info.reasons.contains(ResizeReasons::MIN_TOO_BIG));
    assert_eq!(info.max_size, 100 * MIB);
}
