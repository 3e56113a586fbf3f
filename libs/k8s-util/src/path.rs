/// Collapse names and namespaces in an API request path so the endpoint
/// metric label stays low-cardinality.
///
/// `/apis/apps/v1/namespaces/prod/deployments/web` becomes
/// `/apis/apps/v1/namespaces/{namespace}/deployments/{name}`; anything that
/// is not a core or named group path collapses to `/{other}`.
pub fn metric_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let prefix_len = match segments.first() {
        // /api/v1/...
        Some(&"api") if segments.len() >= 2 => 2,
        // /apis/<group>/<version>/...
        Some(&"apis") if segments.len() >= 3 => 3,
        _ => return "/{other}".to_string(),
    };
    let (prefix, rest) = segments.split_at(prefix_len);

    let mut out: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
    match rest {
        [] => {}
        ["namespaces", _ns, resource, tail @ ..] => {
            out.push("namespaces".into());
            out.push("{namespace}".into());
            out.push((*resource).into());
            collapse_name(&mut out, tail);
        }
        [resource, tail @ ..] => {
            out.push((*resource).into());
            collapse_name(&mut out, tail);
        }
    }
    format!("/{}", out.join("/"))
}

fn collapse_name(out: &mut Vec<String>, tail: &[&str]) {
    match tail {
        [] => {}
        [_name] => out.push("{name}".into()),
        [_name, subresource] => {
            out.push("{name}".into());
            out.push((*subresource).into());
        }
        _ => out.push("{other}".into()),
    }
}
