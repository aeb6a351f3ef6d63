//! Remote user and group enumeration.
//!
//! Linux and BSD servers are queried with `getent`, macOS servers with two
//! `dscl` listings (ids and real names) joined by account name.

use std::collections::BTreeMap;

use super::{os::OsType, transport::SshSession};
use crate::{
    error::{Error, Result},
    host::{Group, User},
};

/// Parses a numeric id. Negative ids, as `dscl` prints for `nobody`, wrap
/// around like they do in `uid_t`.
#[allow(clippy::cast_sign_loss)]
fn parse_id(field: &str) -> Option<u32> {
    let field = field.trim();
    field
        .parse::<u32>()
        .ok()
        .or_else(|| field.parse::<i32>().ok().map(|id| id as u32))
}

/// Orders like the signed ids the servers print, so `-2` comes first
#[allow(clippy::cast_possible_wrap)]
fn signed(id: u32) -> i32 {
    id as i32
}

/// Parses `getent passwd`: `name:passwd:uid:gid:gecos:home:shell`
pub fn parse_getent_passwd(output: &str) -> Vec<User> {
    let mut users = Vec::new();
    for line in output.lines() {
        let fields = line.split(':').collect::<Vec<_>>();
        if fields.len() != 7 {
            continue;
        }
        let Some(uid) = parse_id(fields[2]) else {
            warn!("skipping passwd entry with a bad uid: {line:?}");
            continue;
        };
        users.push(User {
            uid,
            name: fields[0].to_owned(),
            gecos: fields[4].trim_end_matches(',').to_owned(),
        });
    }
    users
}

/// Parses `getent group`: `name:passwd:gid[:members]`
pub fn parse_getent_group(output: &str) -> Vec<Group> {
    let mut groups = Vec::new();
    for line in output.lines() {
        let fields = line.split(':').collect::<Vec<_>>();
        if fields.len() < 3 {
            continue;
        }
        let Some(gid) = parse_id(fields[2]) else {
            warn!("skipping group entry with a bad gid: {line:?}");
            continue;
        };
        groups.push(Group {
            gid,
            name: fields[0].to_owned(),
            gecos: String::new(),
        });
    }
    groups
}

/// Joins `dscl . -list <node> <id key>` and `dscl . -list <node> RealName`
/// by account name. Accounts without an id are dropped.
fn join_dscl(ids: &str, names: &str) -> Vec<(u32, String, String)> {
    let mut accounts: BTreeMap<&str, (Option<u32>, &str)> = BTreeMap::new();

    for line in ids.lines() {
        if let Some((name, id)) = line.split_once(' ') {
            accounts.entry(name).or_default().0 = parse_id(id);
        }
    }
    for line in names.lines() {
        if let Some((name, gecos)) = line.split_once(' ') {
            accounts.entry(name).or_default().1 = gecos.trim_start_matches(' ');
        }
    }

    accounts
        .into_iter()
        .filter_map(|(name, (id, gecos))| Some((id?, name.to_owned(), gecos.to_owned())))
        .collect()
}

pub fn parse_dscl_users(ids: &str, names: &str) -> Vec<User> {
    join_dscl(ids, names)
        .into_iter()
        .map(|(uid, name, gecos)| User { uid, name, gecos })
        .collect()
}

pub fn parse_dscl_groups(ids: &str, names: &str) -> Vec<Group> {
    join_dscl(ids, names)
        .into_iter()
        .map(|(gid, name, gecos)| Group { gid, name, gecos })
        .collect()
}

fn no_capability(os: OsType) -> Error {
    Error::NotSupported(format!("account enumeration on a {os} server"))
}

/// Sorted by uid, one user per uid
pub async fn fetch_users(session: &dyn SshSession, os: OsType) -> Result<Vec<User>> {
    let mut users = match os {
        OsType::Linux | OsType::Bsd => parse_getent_passwd(&session.exec("getent passwd").await?),
        OsType::MacOs => {
            let ids = session.exec("dscl . -list /Users UniqueID").await?;
            let names = session.exec("dscl . -list /Users RealName").await?;
            parse_dscl_users(&ids, &names)
        }
        OsType::Unknown => return Err(no_capability(os)),
    };

    users.sort_by_key(|user| signed(user.uid));
    users.dedup_by_key(|user| user.uid);
    Ok(users)
}

/// Sorted by gid, one group per gid
pub async fn fetch_groups(session: &dyn SshSession, os: OsType) -> Result<Vec<Group>> {
    let mut groups = match os {
        OsType::Linux | OsType::Bsd => parse_getent_group(&session.exec("getent group").await?),
        OsType::MacOs => {
            let ids = session.exec("dscl . -list /Groups PrimaryGroupID").await?;
            let names = session.exec("dscl . -list /Groups RealName").await?;
            parse_dscl_groups(&ids, &names)
        }
        OsType::Unknown => return Err(no_capability(os)),
    };

    groups.sort_by_key(|group| signed(group.gid));
    groups.dedup_by_key(|group| group.gid);
    Ok(groups)
}

#[cfg(test)]
mod test_accounts {
    use super::*;

    #[test]
    fn test_parse_getent_passwd() {
        let output = "root:x:0:0:root:/root:/bin/bash\n\
                      anna:x:1000:1000:Anna Smith,,,:/home/anna:/bin/zsh\n\
                      broken:x:12\n\
                      \n";
        let users = parse_getent_passwd(output);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name, "anna");
        assert_eq!(users[1].uid, 1000);
        assert_eq!(users[1].gecos, "Anna Smith");
    }

    #[test]
    fn test_parse_getent_group() {
        let groups = parse_getent_group("wheel:x:10:anna,bob\nstaff:*:20:\nshort:x\n");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "wheel");
        assert_eq!(groups[0].gid, 10);
        assert_eq!(groups[1].gid, 20);
    }

    #[test]
    fn test_parse_dscl_users() {
        let ids = "_www             70\nanna             501\nnobody           -2\n";
        let names = "_www             World Wide Web Server\nanna             Anna Smith\nghost            Nobody Home\n";
        let users = parse_dscl_users(ids, names);
        assert_eq!(users.len(), 3);

        let anna = users.iter().find(|u| u.name == "anna").unwrap();
        assert_eq!(anna.uid, 501);
        assert_eq!(anna.gecos, "Anna Smith");

        let nobody = users.iter().find(|u| u.name == "nobody").unwrap();
        assert_eq!(nobody.uid, u32::MAX - 1);
        assert_eq!(nobody.gecos, "");
        assert!(users.iter().all(|u| u.name != "ghost"));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(" 42 "), Some(42));
        assert_eq!(parse_id("-2"), Some(4_294_967_294));
        assert_eq!(parse_id("x"), None);
    }
}
