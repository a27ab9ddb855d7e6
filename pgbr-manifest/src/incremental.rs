use log::warn;

use crate::types::Manifest;

/// Reconciles a freshly built full manifest against the prior backup's
/// manifest to produce an incremental/differential one (spec §4.4's
/// "Build incremental" rules).
pub fn build_incremental(mut current: Manifest, prior: &Manifest, delta: bool) -> Manifest {
    for file in current.files.iter_mut() {
        let Some(prior_file) = prior.files.iter().find(|p| p.name == file.name) else {
            // Only in the current manifest: copy, no reference.
            continue;
        };

        let metadata_matches = prior_file.size == file.size
            && prior_file.timestamp == file.timestamp
            && prior_file.mode == file.mode
            && prior_file.user == file.user
            && prior_file.group == file.group;

        if metadata_matches && prior_file.checksum_sha1.is_some() {
            file.reference = Some(
                prior_file
                    .reference
                    .clone()
                    .unwrap_or_else(|| prior.data.label.clone()),
            );
            file.checksum_sha1 = prior_file.checksum_sha1;
            file.checksum_page = prior_file.checksum_page;
            file.size_repo = prior_file.size_repo;
            continue;
        }

        let loose_match = prior_file.size == file.size
            && prior_file.timestamp == file.timestamp
            && prior_file.mode == file.mode;
        if loose_match && delta {
            file.reference = None;
        }
    }

    current.data.cipher_sub_pass = prior.data.cipher_sub_pass.clone();

    if prior.data.option_checksum_page && !prior_had_checksum_page_field(prior) {
        current.data.option_checksum_page = false;
    } else if current.data.option_checksum_page != prior.data.option_checksum_page {
        warn!(
            "checksum_page option changed from {} to {}; keeping prior value",
            prior.data.option_checksum_page, current.data.option_checksum_page
        );
        current.data.option_checksum_page = prior.data.option_checksum_page;
    }

    for (flag_name, prior_flag, current_flag) in [
        ("compress", prior.data.option_compress, current.data.option_compress),
        ("hardlink", prior.data.option_hardlink, current.data.option_hardlink),
    ] {
        if prior_flag != current_flag {
            warn!("option '{flag_name}' cannot change between backups in a set; keeping prior value");
        }
    }
    current.data.option_compress = prior.data.option_compress;
    current.data.option_hardlink = prior.data.option_hardlink;

    current
}

/// Backward-compat placeholder: a real prior manifest without the
/// checksum-page field at all (format < N) would report this via a
/// version check on load. In this codec every persisted manifest carries
/// the field once present, so this always returns true; kept as the named
/// hook the backup engine's step 5 describes.
fn prior_had_checksum_page_field(_prior: &Manifest) -> bool {
    true
}
