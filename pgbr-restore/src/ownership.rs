//! Step 6 of `cmd_restore`: resolves the owner/group a restored entry's
//! `null` manifest owner should get. A restore running as root inherits
//! `pg_data`'s on-disk owner for anything the manifest didn't record one
//! for; a non-root restore can't `chown` at all, so every owner is
//! dropped and the files land owned by whichever user ran the restore.

use nix::unistd::Uid;

use pgbr_manifest::Manifest;
use pgbr_storage::Storage;
use pgbr_types::Error;

pub fn resolve_ownership(manifest: &mut Manifest, dest_storage: &dyn Storage, pg_data_root: &str) -> Result<(), Error> {
    if Uid::effective().is_root() {
        let (inherited_user, inherited_group) = match dest_storage.info(pg_data_root, false)? {
            Some(info) => (info.user, info.group),
            None => (None, None),
        };
        for p in manifest.paths.iter_mut() {
            p.user = p.user.take().or_else(|| inherited_user.clone());
            p.group = p.group.take().or_else(|| inherited_group.clone());
        }
        for f in manifest.files.iter_mut() {
            f.user = f.user.take().or_else(|| inherited_user.clone());
            f.group = f.group.take().or_else(|| inherited_group.clone());
        }
        for l in manifest.links.iter_mut() {
            l.user = l.user.take().or_else(|| inherited_user.clone());
            l.group = l.group.take().or_else(|| inherited_group.clone());
        }
    } else {
        for p in manifest.paths.iter_mut() {
            p.user = None;
            p.group = None;
        }
        for f in manifest.files.iter_mut() {
            f.user = None;
            f.group = None;
        }
        for l in manifest.links.iter_mut() {
            l.user = None;
            l.group = None;
        }
    }
    Ok(())
}
