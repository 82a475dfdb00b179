//! Group id lookup in an image's group database.

use crate::errors::ProvisionError;
use crate::paths::GROUP_DB;
use anyhow::Context;
use std::fs;
use std::path::Path;

/// Third field of the first `group:...` line, if any. Not yet parsed as a number.
pub fn find_group_field<'c>(content: &'c str, group: &str) -> Option<&'c str> {
    content.lines().find_map(|line| {
        let mut fields = line.split(':');
        if fields.next()? != group {
            return None;
        }
        let _password = fields.next();
        Some(fields.next().unwrap_or("").trim())
    })
}

pub fn parse_gid(content: &str, group: &str, db: &Path) -> Result<u32, ProvisionError> {
    let field = find_group_field(content, group).ok_or_else(|| ProvisionError::GroupNotFound {
        group: group.to_string(),
        path: db.to_path_buf(),
    })?;
    field.parse().map_err(|_| ProvisionError::InvalidGroupId {
        group: group.to_string(),
        value: field.to_string(),
    })
}

/// Numeric id of `group` according to `<root>/etc/group`.
pub fn lookup_gid(root: &Path, group: &str) -> anyhow::Result<u32> {
    let db = root.join(GROUP_DB);
    let content =
        fs::read_to_string(&db).with_context(|| format!("read group database {}", db.display()))?;
    let gid = parse_gid(&content, group, &db)?;
    log::debug!("group {} has gid {}", group, gid);
    Ok(gid)
}
